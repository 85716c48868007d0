//! tsort classifies a nearly-ordered stream of timestamped records against a running high-water
//! mark (HWM). Every record ends up in exactly one of three classes:
//!
//! - **EARLY**: the record is too far ahead, as decided by the configured [EarlyPolicy].
//! - **LATE**: `event_time + lateness < HWM`.
//! - **ON_TIME**: everything else. Only these records may advance the HWM.
//!
//! ```text
//! (input) --[c]--> (classifier) --+--[c]--> on_time
//!                       |         +--[c]--> early
//!                 {watermark}     +--[c]--> late
//!                                 +--[c]--> errors
//!
//! [c] - channel
//! {}  - state owned by the classifier, one per partition
//! ```
//!
//! The [Classifier] is a synchronous transition function; it is wrapped by the
//! [ClassifierHandle] actor for single-writer access from async code and by the [Forwarder] for
//! stream-to-channel wiring.

pub use crate::annotated::{AnnotatedRecord, Annotator};
pub use crate::classifier::actor::ClassifierHandle;
pub use crate::classifier::partitioned::PartitionedClassifier;
pub use crate::classifier::{Classification, Classified, Classifier, ClassifierStats, Outcome};
pub use crate::config::{
    ClassifierConfig, ClassifierSpec, EarlyPolicyConfig, OutputMode, PreviousTimeTracking,
    Smoothing,
};
pub use crate::error::{Error, EventTimeError, ReasonCode, RecordError, Result};
pub use crate::forwarder::{Forwarder, Output};
pub use crate::message::{EventTimeExtractor, JsonFieldExtractor, Message, MessageEventTime};
pub use crate::policy::{Clock, Diagnostic, EarlyPolicy, SystemClock};
pub use crate::router::{Partitioned, Router, RouterReceivers};
pub use crate::watermark::{Timestamp, WatermarkState, WatermarkStateBlob};

mod error;

/// Output of the classifier when every record is retained with its label and HWM.
pub mod annotated;

/// Per-record transition function and its single-writer wrappers.
pub mod classifier;

/// Classifier configuration, validated once at construction.
pub mod config;

/// Wires an input stream through the classifier into the configured output.
pub mod forwarder;

pub mod message;

/// Prometheus metrics for the classifier.
pub mod metrics;

/// Early-detection policies and the shared late check.
pub mod policy;

/// Three-way fan-out of classified records.
pub mod router;

pub mod watermark;
