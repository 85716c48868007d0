//! Early detection is a policy decision, the late check is not. Every [EarlyPolicy] answers "is
//! this record too far ahead?" against the state from *before* the record is applied; the late
//! check is fixed and shared by all of them.
//!
//! The policies are not interchangeable:
//!
//! | policy          | compares against             | reproducible |
//! |-----------------|------------------------------|--------------|
//! | wall clock      | `now() + tolerance`          | no           |
//! | step delta      | previous event time + step   | yes          |
//! | watermark bound | HWM + tolerance              | yes          |
//! | rolling average | smoothed event time + tol.   | yes          |

use std::sync::Arc;

use chrono::{TimeDelta, Utc};

use crate::config::EarlyPolicyConfig;
use crate::error::Error;
use crate::watermark::{Timestamp, WatermarkState};

pub use self::rolling_average::RollingAverage;
pub use self::step_delta::StepDelta;
pub use self::wall_clock::WallClockBound;
pub use self::watermark_bound::WatermarkBound;

mod rolling_average;
mod step_delta;
mod wall_clock;
mod watermark_bound;

/// Source of "now" for the wall-clock policy.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Reads the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Non-fatal observations made while classifying a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// The record was classified EARLY because of the wall clock at evaluation time. A replay of
    /// the same input may classify it differently.
    ClockSkew {
        event_time: Timestamp,
        wall_clock: Timestamp,
        tolerance: TimeDelta,
    },
}

/// Policy-internal state that has to survive a checkpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum PolicyState {
    #[default]
    Stateless,
    Exponential {
        average_micros: Option<f64>,
    },
    Window {
        samples_micros: Vec<i64>,
    },
}

pub trait EarlyPolicy: Send {
    fn name(&self) -> &'static str;

    /// True if `event_time` is too far ahead. `state` excludes the record being tested.
    fn is_too_early(&self, event_time: Timestamp, state: &WatermarkState) -> bool;

    /// Same as [EarlyPolicy::is_too_early], also returning a diagnostic when the verdict needs
    /// one.
    fn check(&self, event_time: Timestamp, state: &WatermarkState) -> (bool, Option<Diagnostic>) {
        (self.is_too_early(event_time, state), None)
    }

    fn is_reproducible(&self) -> bool {
        true
    }

    /// Called whenever the previous-event-time tracker is updated.
    fn observe(&mut self, _event_time: Timestamp) {}

    fn export_state(&self) -> PolicyState {
        PolicyState::Stateless
    }

    /// Replaces the internal state. On error the current state is left untouched.
    fn import_state(&mut self, state: PolicyState) -> crate::Result<()> {
        match state {
            PolicyState::Stateless => Ok(()),
            other => Err(Error::Snapshot(format!(
                "{} policy cannot restore state {other:?}",
                self.name()
            ))),
        }
    }
}

/// `hwm.is_some() && event_time + lateness < hwm`
pub(crate) fn is_too_late(
    event_time: Timestamp,
    state: &WatermarkState,
    lateness: TimeDelta,
) -> bool {
    match (state.current_hwm(), event_time.checked_add_signed(lateness)) {
        (Some(hwm), Some(shifted)) => shifted < hwm,
        _ => false,
    }
}

/// Builds the configured policy on top of the system clock.
pub fn build(config: &EarlyPolicyConfig) -> Box<dyn EarlyPolicy> {
    build_with_clock(config, Arc::new(SystemClock))
}

/// Builds the configured policy. The clock is only consulted by the wall-clock policy.
pub fn build_with_clock(config: &EarlyPolicyConfig, clock: Arc<dyn Clock>) -> Box<dyn EarlyPolicy> {
    match *config {
        EarlyPolicyConfig::WallClock { tolerance } => {
            Box::new(WallClockBound::new(tolerance, clock))
        }
        EarlyPolicyConfig::StepDelta { max_step } => Box::new(StepDelta::new(max_step)),
        EarlyPolicyConfig::WatermarkBound { tolerance } => Box::new(WatermarkBound::new(tolerance)),
        EarlyPolicyConfig::RollingAverage {
            tolerance,
            smoothing,
        } => Box::new(RollingAverage::new(tolerance, smoothing)),
    }
}


#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::config::Smoothing;

    fn at(h: u32, m: u32) -> Timestamp {
        chrono::Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_is_too_late_without_hwm() {
        let state = WatermarkState::new();
        assert!(!is_too_late(at(0, 0), &state, TimeDelta::zero()));
    }

    #[test]
    fn test_is_too_late_boundary() {
        let mut state = WatermarkState::new();
        state.advance(at(10, 3));

        // 09:50 + 5m = 09:55 < 10:03
        assert!(is_too_late(at(9, 50), &state, TimeDelta::minutes(5)));
        // 09:58 + 5m = 10:03, not strictly behind
        assert!(!is_too_late(at(9, 58), &state, TimeDelta::minutes(5)));
        // zero lateness rejects anything behind the HWM
        assert!(is_too_late(at(10, 2), &state, TimeDelta::zero()));
        assert!(!is_too_late(at(10, 3), &state, TimeDelta::zero()));
    }

    #[test]
    fn test_build_matches_config() {
        let cases = [
            (
                EarlyPolicyConfig::WallClock {
                    tolerance: TimeDelta::zero(),
                },
                "wall_clock",
                false,
            ),
            (
                EarlyPolicyConfig::StepDelta {
                    max_step: TimeDelta::zero(),
                },
                "step_delta",
                true,
            ),
            (
                EarlyPolicyConfig::WatermarkBound {
                    tolerance: TimeDelta::zero(),
                },
                "watermark_bound",
                true,
            ),
            (
                EarlyPolicyConfig::RollingAverage {
                    tolerance: TimeDelta::zero(),
                    smoothing: Smoothing::Window { size: 2 },
                },
                "rolling_average",
                true,
            ),
        ];

        for (config, name, reproducible) in cases {
            let policy = build(&config);
            assert_eq!(policy.name(), name);
            assert_eq!(policy.name(), config.name());
            assert_eq!(policy.is_reproducible(), reproducible);
        }
    }

    #[test]
    fn test_stateless_policy_rejects_foreign_state() {
        let mut policy = build(&EarlyPolicyConfig::StepDelta {
            max_step: TimeDelta::minutes(1),
        });
        assert!(policy.import_state(PolicyState::Stateless).is_ok());
        assert!(matches!(
            policy.import_state(PolicyState::Window {
                samples_micros: vec![1]
            }),
            Err(Error::Snapshot(_))
        ));
    }
}
