use chrono::TimeDelta;

use crate::policy::EarlyPolicy;
use crate::watermark::{Timestamp, WatermarkState};

/// EARLY when `event_time > previous_event_time + max_step`.
///
/// The baseline is the previous tracked record, not the HWM. Since the tracker also moves on
/// EARLY records (by default), an extreme outlier becomes the baseline for the record right after
/// it; this makes the policy more sensitive to saw-tooth patterns than [super::WatermarkBound].
#[derive(Debug, Clone, Copy)]
pub struct StepDelta {
    max_step: TimeDelta,
}

impl StepDelta {
    pub fn new(max_step: TimeDelta) -> Self {
        Self { max_step }
    }
}

impl EarlyPolicy for StepDelta {
    fn name(&self) -> &'static str {
        "step_delta"
    }

    fn is_too_early(&self, event_time: Timestamp, state: &WatermarkState) -> bool {
        state
            .last_event_time()
            .and_then(|previous| previous.checked_add_signed(self.max_step))
            .is_some_and(|bound| event_time > bound)
    }
}
