use std::collections::VecDeque;

use chrono::{DateTime, TimeDelta};

use crate::config::Smoothing;
use crate::error::Error;
use crate::policy::{EarlyPolicy, PolicyState};
use crate::watermark::{Timestamp, WatermarkState};

/// EARLY when `event_time > average + tolerance`, where the average smooths the event times seen
/// by the previous-time tracker. A single outlier moves the baseline by a fraction of its distance
/// instead of replacing it, as [super::StepDelta] does.
#[derive(Debug, Clone)]
pub struct RollingAverage {
    tolerance: TimeDelta,
    average: Average,
}

#[derive(Debug, Clone)]
enum Average {
    Exponential {
        alpha: f64,
        /// micros since epoch
        current: Option<f64>,
    },
    Window {
        size: usize,
        samples: VecDeque<i64>,
    },
}

impl RollingAverage {
    pub fn new(tolerance: TimeDelta, smoothing: Smoothing) -> Self {
        let average = match smoothing {
            Smoothing::Exponential { alpha } => Average::Exponential {
                alpha,
                current: None,
            },
            Smoothing::Window { size } => Average::Window {
                size,
                samples: VecDeque::new(),
            },
        };
        Self { tolerance, average }
    }

    /// The current smoothed event time, None before the first observation.
    pub fn average(&self) -> Option<Timestamp> {
        let micros = match &self.average {
            Average::Exponential { current, .. } => current.map(|avg| avg.round() as i64),
            Average::Window { samples, .. } => {
                if samples.is_empty() {
                    None
                } else {
                    let sum: i128 = samples.iter().map(|s| *s as i128).sum();
                    Some((sum / samples.len() as i128) as i64)
                }
            }
        };
        micros.and_then(DateTime::from_timestamp_micros)
    }
}

impl EarlyPolicy for RollingAverage {
    fn name(&self) -> &'static str {
        "rolling_average"
    }

    fn is_too_early(&self, event_time: Timestamp, _state: &WatermarkState) -> bool {
        self.average()
            .and_then(|avg| avg.checked_add_signed(self.tolerance))
            .is_some_and(|bound| event_time > bound)
    }

    fn observe(&mut self, event_time: Timestamp) {
        let micros = event_time.timestamp_micros();
        match &mut self.average {
            Average::Exponential { alpha, current } => {
                let x = micros as f64;
                *current = Some(match current {
                    Some(avg) => *alpha * x + (1.0 - *alpha) * *avg,
                    None => x,
                });
            }
            Average::Window { size, samples } => {
                if samples.len() == *size {
                    samples.pop_front();
                }
                samples.push_back(micros);
            }
        }
    }

    fn export_state(&self) -> PolicyState {
        match &self.average {
            Average::Exponential { current, .. } => PolicyState::Exponential {
                average_micros: *current,
            },
            Average::Window { samples, .. } => PolicyState::Window {
                samples_micros: samples.iter().copied().collect(),
            },
        }
    }

    fn import_state(&mut self, state: PolicyState) -> crate::Result<()> {
        match (&mut self.average, state) {
            (Average::Exponential { current, .. }, PolicyState::Exponential { average_micros }) => {
                if average_micros.is_some_and(|avg| !avg.is_finite()) {
                    return Err(Error::Snapshot(
                        "rolling average is not a finite number".to_string(),
                    ));
                }
                *current = average_micros;
                Ok(())
            }
            (Average::Window { size, samples }, PolicyState::Window { samples_micros }) => {
                // a checkpoint taken with a larger window keeps its most recent samples
                let skip = samples_micros.len().saturating_sub(*size);
                *samples = samples_micros.into_iter().skip(skip).collect();
                Ok(())
            }
            (_, other) => Err(Error::Snapshot(format!(
                "rolling average policy cannot restore state {other:?}"
            ))),
        }
    }
}
