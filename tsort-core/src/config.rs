//! Classifier configuration. The user-facing [ClassifierSpec] is plain serde data with durations
//! in (signed) milliseconds so that negative values survive parsing and can be rejected; it is
//! converted once into the validated [ClassifierConfig].

use std::env;
use std::path::Path;

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::Result;
use crate::classifier::Classification;
use crate::error::Error;

/// Environment variable carrying a base64 encoded JSON [ClassifierSpec].
pub const ENV_CLASSIFIER_OBJ: &str = "TSORT_CLASSIFIER_OBJECT";

const DEFAULT_LATENESS_MS: i64 = 5 * 60 * 1000;

/// Upper bound on [Smoothing::Window] sizes. The window is held in memory and is part of every
/// snapshot.
pub const MAX_WINDOW_SIZE: usize = 100_000;

/// How classified records leave the classifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// EARLY, LATE and ON_TIME records go to separate sequences.
    #[default]
    ThreeWayRoute,
    /// Every record is emitted once, labeled with its class and the HWM it was tested against.
    AnnotatedStream,
}

/// Which records update the previous-event-time tracker used by the step-delta and
/// rolling-average policies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviousTimeTracking {
    /// ON_TIME and EARLY records update the tracker, LATE records do not. A single extreme
    /// outlier therefore becomes the baseline for the next record.
    #[default]
    ExceptLate,
    /// Every record with a readable event time updates the tracker.
    EveryRecord,
    /// Only ON_TIME records update the tracker.
    OnTimeOnly,
}

impl PreviousTimeTracking {
    pub fn name(&self) -> &'static str {
        match self {
            PreviousTimeTracking::ExceptLate => "except_late",
            PreviousTimeTracking::EveryRecord => "every_record",
            PreviousTimeTracking::OnTimeOnly => "on_time_only",
        }
    }

    pub(crate) fn tracks(&self, classification: Classification) -> bool {
        match self {
            PreviousTimeTracking::ExceptLate => classification != Classification::Late,
            PreviousTimeTracking::EveryRecord => true,
            PreviousTimeTracking::OnTimeOnly => classification == Classification::OnTime,
        }
    }
}

/// Smoothing used by the rolling-average policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Smoothing {
    /// Exponential moving average, `avg = alpha * x + (1 - alpha) * avg`.
    Exponential { alpha: f64 },
    /// Mean of the last `size` observed event times.
    Window { size: usize },
}

/// Validated early-detection policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EarlyPolicyConfig {
    /// `event_time > now() + tolerance`. Depends on the wall clock, so replays are not
    /// reproducible.
    WallClock { tolerance: TimeDelta },
    /// `event_time > previous_event_time + max_step`.
    StepDelta { max_step: TimeDelta },
    /// `event_time > hwm + tolerance`.
    WatermarkBound { tolerance: TimeDelta },
    /// `event_time > average + tolerance`.
    RollingAverage {
        tolerance: TimeDelta,
        smoothing: Smoothing,
    },
}

impl EarlyPolicyConfig {
    pub fn name(&self) -> &'static str {
        match self {
            EarlyPolicyConfig::WallClock { .. } => "wall_clock",
            EarlyPolicyConfig::StepDelta { .. } => "step_delta",
            EarlyPolicyConfig::WatermarkBound { .. } => "watermark_bound",
            EarlyPolicyConfig::RollingAverage { .. } => "rolling_average",
        }
    }

    /// Only the wall-clock policy makes the classification depend on processing time.
    pub fn non_reproducible(&self) -> bool {
        matches!(self, EarlyPolicyConfig::WallClock { .. })
    }

    fn validate(&self) -> Result<()> {
        let (label, bound) = match self {
            EarlyPolicyConfig::WallClock { tolerance } => ("tolerance", tolerance),
            EarlyPolicyConfig::StepDelta { max_step } => ("max_step", max_step),
            EarlyPolicyConfig::WatermarkBound { tolerance } => ("tolerance", tolerance),
            EarlyPolicyConfig::RollingAverage {
                tolerance,
                smoothing,
            } => {
                match smoothing {
                    Smoothing::Exponential { alpha } if !(*alpha > 0.0 && *alpha <= 1.0) => {
                        return Err(Error::Config(format!(
                            "rolling average alpha must be in (0, 1], got {alpha}"
                        )));
                    }
                    Smoothing::Window { size: 0 } => {
                        return Err(Error::Config(
                            "rolling average window size must be at least 1".to_string(),
                        ));
                    }
                    Smoothing::Window { size } if *size > MAX_WINDOW_SIZE => {
                        return Err(Error::Config(format!(
                            "rolling average window size must be at most {MAX_WINDOW_SIZE}, got {size}"
                        )));
                    }
                    _ => {}
                }
                ("tolerance", tolerance)
            }
        };

        if *bound < TimeDelta::zero() {
            return Err(Error::Config(format!(
                "{} {label} must not be negative, got {}ms",
                self.name(),
                bound.num_milliseconds()
            )));
        }
        Ok(())
    }
}

/// Immutable classifier configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierConfig {
    /// Maximum permitted gap behind the HWM before a record is LATE.
    pub lateness: TimeDelta,
    pub early_policy: EarlyPolicyConfig,
    pub mode: OutputMode,
    pub previous_time_tracking: PreviousTimeTracking,
}

impl ClassifierConfig {
    pub fn new(lateness: TimeDelta, early_policy: EarlyPolicyConfig) -> Self {
        Self {
            lateness,
            early_policy,
            mode: OutputMode::default(),
            previous_time_tracking: PreviousTimeTracking::default(),
        }
    }

    pub fn with_mode(mut self, mode: OutputMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_previous_time_tracking(mut self, tracking: PreviousTimeTracking) -> Self {
        self.previous_time_tracking = tracking;
        self
    }

    pub fn non_reproducible(&self) -> bool {
        self.early_policy.non_reproducible()
    }

    /// Fails fast on settings that would make classification meaningless. Called by the
    /// classifier before any record is processed.
    pub fn validate(&self) -> Result<()> {
        if self.lateness < TimeDelta::zero() {
            return Err(Error::Config(format!(
                "lateness must not be negative, got {}ms",
                self.lateness.num_milliseconds()
            )));
        }
        self.early_policy.validate()
    }

    /// Loads the config from the base64 encoded JSON in [ENV_CLASSIFIER_OBJ]. Returns None if
    /// the variable is not set.
    pub fn load_from_env() -> Result<Option<Self>> {
        match env::var(ENV_CLASSIFIER_OBJ) {
            Ok(obj) => Self::load(obj).map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Loads the config from a base64 encoded JSON [ClassifierSpec].
    pub fn load(encoded_spec: String) -> Result<Self> {
        let decoded_spec = BASE64_STANDARD
            .decode(encoded_spec.as_bytes())
            .map_err(|e| Error::Config(format!("Failed to decode classifier spec: {e:?}")))?;

        let spec: ClassifierSpec = serde_json::from_slice(&decoded_spec)
            .map_err(|e| Error::Config(format!("Failed to parse classifier spec: {e:?}")))?;

        spec.try_into()
    }

    /// Loads the config from a JSON file holding a [ClassifierSpec].
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {e}", path.display())))?;

        let spec: ClassifierSpec = serde_json::from_slice(&contents).map_err(|e| {
            Error::Config(format!("Failed to parse {}: {e}", path.display()))
        })?;

        spec.try_into()
    }
}

/// Serialized form of the early policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EarlyPolicySpec {
    WallClock {
        tolerance_ms: i64,
    },
    StepDelta {
        max_step_ms: i64,
    },
    WatermarkBound {
        tolerance_ms: i64,
    },
    RollingAverage {
        tolerance_ms: i64,
        smoothing: Smoothing,
    },
}

/// Serialized form of [ClassifierConfig].
///
/// ```json
/// {
///   "lateness_ms": 300000,
///   "early_policy": { "kind": "step_delta", "max_step_ms": 300000 },
///   "mode": "three_way_route",
///   "previous_time_tracking": "except_late"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierSpec {
    #[serde(default = "default_lateness_ms")]
    pub lateness_ms: i64,
    pub early_policy: EarlyPolicySpec,
    #[serde(default)]
    pub mode: OutputMode,
    #[serde(default)]
    pub previous_time_tracking: PreviousTimeTracking,
}

fn default_lateness_ms() -> i64 {
    DEFAULT_LATENESS_MS
}

fn millis(label: &str, ms: i64) -> Result<TimeDelta> {
    TimeDelta::try_milliseconds(ms)
        .ok_or_else(|| Error::Config(format!("{label} is out of range, got {ms}")))
}

impl TryFrom<ClassifierSpec> for ClassifierConfig {
    type Error = Error;

    fn try_from(spec: ClassifierSpec) -> Result<Self> {
        let early_policy = match spec.early_policy {
            EarlyPolicySpec::WallClock { tolerance_ms } => EarlyPolicyConfig::WallClock {
                tolerance: millis("tolerance_ms", tolerance_ms)?,
            },
            EarlyPolicySpec::StepDelta { max_step_ms } => EarlyPolicyConfig::StepDelta {
                max_step: millis("max_step_ms", max_step_ms)?,
            },
            EarlyPolicySpec::WatermarkBound { tolerance_ms } => {
                EarlyPolicyConfig::WatermarkBound {
                    tolerance: millis("tolerance_ms", tolerance_ms)?,
                }
            }
            EarlyPolicySpec::RollingAverage {
                tolerance_ms,
                smoothing,
            } => EarlyPolicyConfig::RollingAverage {
                tolerance: millis("tolerance_ms", tolerance_ms)?,
                smoothing,
            },
        };

        let config = ClassifierConfig {
            lateness: millis("lateness_ms", spec.lateness_ms)?,
            early_policy,
            mode: spec.mode,
            previous_time_tracking: spec.previous_time_tracking,
        };
        config.validate()?;

        info!(
            lateness_ms = spec.lateness_ms,
            early_policy = config.early_policy.name(),
            mode = ?config.mode,
            previous_time_tracking = ?config.previous_time_tracking,
            "Loaded classifier configuration"
        );
        if config.non_reproducible() {
            warn!(
                early_policy = config.early_policy.name(),
                "Configured early policy is non-reproducible, replays may classify differently"
            );
        }

        Ok(config)
    }
}
