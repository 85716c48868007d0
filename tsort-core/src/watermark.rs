//! The watermark is the high-water mark (HWM) of the partition: the maximum event time among the
//! records accepted as ON_TIME so far. It is a scalar maintained incrementally by the classifier,
//! never recomputed from history.

use chrono::{DateTime, Utc};

pub use self::snapshot::WatermarkStateBlob;
pub use self::state::WatermarkState;

pub(crate) mod snapshot;
mod state;

/// Event time of a record.
pub type Timestamp = DateTime<Utc>;
