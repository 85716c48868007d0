use std::sync::Arc;

use chrono::TimeDelta;
use tracing::warn;

use crate::policy::{Clock, Diagnostic, EarlyPolicy};
use crate::watermark::{Timestamp, WatermarkState};

/// EARLY when `event_time > now() + tolerance`.
///
/// The verdict depends on when the record is evaluated, not only on the input. Replaying the same
/// stream later (or on a host with a skewed clock) can classify records differently, which is why
/// every EARLY verdict from this policy carries a [Diagnostic::ClockSkew].
pub struct WallClockBound {
    tolerance: TimeDelta,
    clock: Arc<dyn Clock>,
}

impl WallClockBound {
    pub fn new(tolerance: TimeDelta, clock: Arc<dyn Clock>) -> Self {
        warn!(
            tolerance_ms = tolerance.num_milliseconds(),
            "Wall-clock early policy is non-reproducible, classification depends on processing time"
        );
        Self { tolerance, clock }
    }

    fn verdict(&self, event_time: Timestamp) -> (bool, Timestamp) {
        let now = self.clock.now();
        let early = match now.checked_add_signed(self.tolerance) {
            Some(bound) => event_time > bound,
            None => false,
        };
        (early, now)
    }
}

impl EarlyPolicy for WallClockBound {
    fn name(&self) -> &'static str {
        "wall_clock"
    }

    fn is_too_early(&self, event_time: Timestamp, _state: &WatermarkState) -> bool {
        self.verdict(event_time).0
    }

    fn check(&self, event_time: Timestamp, _state: &WatermarkState) -> (bool, Option<Diagnostic>) {
        let (early, now) = self.verdict(event_time);
        if !early {
            return (false, None);
        }
        (
            true,
            Some(Diagnostic::ClockSkew {
                event_time,
                wall_clock: now,
                tolerance: self.tolerance,
            }),
        )
    }

    fn is_reproducible(&self) -> bool {
        false
    }
}
