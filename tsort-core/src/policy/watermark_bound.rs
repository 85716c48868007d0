use chrono::TimeDelta;

use crate::policy::EarlyPolicy;
use crate::watermark::{Timestamp, WatermarkState};

/// EARLY when `event_time > hwm + tolerance`, the mirror image of the late check. Both bounds
/// hang off the same HWM.
#[derive(Debug, Clone, Copy)]
pub struct WatermarkBound {
    tolerance: TimeDelta,
}

impl WatermarkBound {
    pub fn new(tolerance: TimeDelta) -> Self {
        Self { tolerance }
    }
}

impl EarlyPolicy for WatermarkBound {
    fn name(&self) -> &'static str {
        "watermark_bound"
    }

    fn is_too_early(&self, event_time: Timestamp, state: &WatermarkState) -> bool {
        state
            .early_threshold(self.tolerance)
            .is_some_and(|bound| event_time > bound)
    }
}
