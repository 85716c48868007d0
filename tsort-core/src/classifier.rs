//! The classifier is the transition function of one partition. For each record, in order:
//!
//! 1. Read the event time. On failure the record goes to the error path, state untouched.
//! 2. No HWM yet: ON_TIME, the record bootstraps the HWM.
//! 3. The early policy says too early: EARLY, the HWM does not move.
//! 4. `event_time + lateness < HWM`: LATE, the HWM does not move.
//! 5. Otherwise ON_TIME, `HWM = max(HWM, event_time)`.
//!
//! Every comparison uses the state from before the record, so a record never takes part in its
//! own admission test. All decisions are made before any state is written, which keeps each
//! transition atomic.
//!
//! The classifier must be driven by a single writer. [actor::ClassifierHandle] provides that for
//! async callers, [partitioned::PartitionedClassifier] runs one per partition.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ClassifierConfig, OutputMode};
use crate::error::RecordError;
use crate::message::EventTimeExtractor;
use crate::metrics;
use crate::policy::{self, Clock, Diagnostic, EarlyPolicy, SystemClock};
use crate::watermark::snapshot::Checkpoint;
use crate::watermark::{Timestamp, WatermarkState, WatermarkStateBlob};

pub mod actor;
pub mod partitioned;

/// Class of a record relative to the HWM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Classification {
    #[serde(rename = "EARLY")]
    Early,
    #[serde(rename = "LATE")]
    Late,
    #[serde(rename = "ON_TIME")]
    OnTime,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Early => "EARLY",
            Classification::Late => "LATE",
            Classification::OnTime => "ON_TIME",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record together with its classification.
#[derive(Debug, Clone, PartialEq)]
pub struct Classified<R> {
    pub record: R,
    pub event_time: Timestamp,
    pub classification: Classification,
    /// HWM the record was tested against, i.e. before this record was applied.
    pub hwm: Option<Timestamp>,
    pub diagnostic: Option<Diagnostic>,
}

/// Result of one transition.
pub type Outcome<R> = std::result::Result<Classified<R>, RecordError<R>>;

/// Running counters of one classifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassifierStats {
    pub on_time: u64,
    pub early: u64,
    pub late: u64,
    pub errors: u64,
    pub clock_skew_warnings: u64,
}

impl ClassifierStats {
    pub fn total(&self) -> u64 {
        self.on_time + self.early + self.late + self.errors
    }

    fn record(&mut self, classification: Classification) {
        match classification {
            Classification::OnTime => self.on_time += 1,
            Classification::Early => self.early += 1,
            Classification::Late => self.late += 1,
        }
    }
}

/// Classifier owns the [WatermarkState] of one partition and applies the transition for each
/// record.
pub struct Classifier<R, E> {
    config: ClassifierConfig,
    state: WatermarkState,
    policy: Box<dyn EarlyPolicy>,
    extractor: E,
    stats: ClassifierStats,
    partition: u16,
    _record: PhantomData<fn(R)>,
}

impl<R, E> Classifier<R, E>
where
    E: EventTimeExtractor<R>,
{
    /// Creates a classifier with the system clock. Fails on an invalid configuration before any
    /// record is seen.
    pub fn new(config: ClassifierConfig, extractor: E) -> crate::Result<Self> {
        Self::with_clock(config, extractor, Arc::new(SystemClock))
    }

    /// Creates a classifier whose wall-clock policy (if configured) reads `clock`.
    pub fn with_clock(
        config: ClassifierConfig,
        extractor: E,
        clock: Arc<dyn Clock>,
    ) -> crate::Result<Self> {
        config.validate()?;
        let policy = policy::build_with_clock(&config.early_policy, clock);

        info!(
            lateness_ms = config.lateness.num_milliseconds(),
            early_policy = policy.name(),
            reproducible = policy.is_reproducible(),
            mode = ?config.mode,
            "Classifier created"
        );

        Ok(Self {
            config,
            state: WatermarkState::new(),
            policy,
            extractor,
            stats: ClassifierStats::default(),
            partition: 0,
            _record: PhantomData,
        })
    }

    /// Sets the partition used in logs and metric labels.
    pub fn with_partition(mut self, partition: u16) -> Self {
        self.partition = partition;
        self
    }

    pub fn partition(&self) -> u16 {
        self.partition
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn mode(&self) -> OutputMode {
        self.config.mode
    }

    pub fn state(&self) -> &WatermarkState {
        &self.state
    }

    pub fn current_hwm(&self) -> Option<Timestamp> {
        self.state.current_hwm()
    }

    pub fn stats(&self) -> ClassifierStats {
        self.stats
    }

    /// Applies the transition for one record.
    pub fn classify(&mut self, record: R) -> Outcome<R> {
        let event_time = match self.extractor.event_time(&record) {
            Ok(event_time) => event_time,
            Err(error) => {
                self.stats.errors += 1;
                metrics::record_error(self.partition, error.reason());
                warn!(partition = self.partition, reason = %error.reason(), %error, "Record rejected");
                return Err(RecordError { record, error });
            }
        };

        let hwm = self.state.current_hwm();
        let (classification, diagnostic) = self.decide(event_time);

        // all decisions are made, apply them
        if classification == Classification::OnTime {
            self.state.advance(event_time);
        }
        if self.config.previous_time_tracking.tracks(classification) {
            self.state.track_previous(event_time);
            self.policy.observe(event_time);
        }

        self.stats.record(classification);
        if let Some(Diagnostic::ClockSkew {
            wall_clock,
            tolerance,
            ..
        }) = &diagnostic
        {
            self.stats.clock_skew_warnings += 1;
            warn!(
                partition = self.partition,
                %event_time,
                %wall_clock,
                tolerance_ms = tolerance.num_milliseconds(),
                "Classified EARLY by wall clock, result is not reproducible"
            );
        }
        metrics::record_classification(self.partition, classification, self.state.current_hwm());

        debug!(
            partition = self.partition,
            %event_time,
            hwm = ?hwm,
            %classification,
            "Record classified"
        );

        Ok(Classified {
            record,
            event_time,
            classification,
            hwm,
            diagnostic,
        })
    }

    fn decide(&self, event_time: Timestamp) -> (Classification, Option<Diagnostic>) {
        if self.state.current_hwm().is_none() {
            return (Classification::OnTime, None);
        }

        let (early, diagnostic) = self.policy.check(event_time, &self.state);
        if early {
            return (Classification::Early, diagnostic);
        }

        if policy::is_too_late(event_time, &self.state, self.config.lateness) {
            return (Classification::Late, None);
        }

        (Classification::OnTime, None)
    }

    /// Classifies all records in order, collecting the outcomes.
    pub fn classify_all<I>(&mut self, records: I) -> Vec<Outcome<R>>
    where
        I: IntoIterator<Item = R>,
    {
        records.into_iter().map(|r| self.classify(r)).collect()
    }

    /// Captures the watermark state (and any policy-internal state) for checkpointing.
    pub fn snapshot(&self) -> WatermarkStateBlob {
        let checkpoint = Checkpoint {
            state: self.state,
            policy: self.policy.export_state(),
        };
        WatermarkStateBlob::from(&checkpoint)
    }

    /// Restores state captured by [Classifier::snapshot]. Counters are not part of the snapshot.
    /// On error the classifier is left exactly as it was.
    pub fn restore(&mut self, blob: &WatermarkStateBlob) -> crate::Result<()> {
        let checkpoint = Checkpoint::try_from(blob)?;
        self.policy.import_state(checkpoint.policy)?;
        self.state = checkpoint.state;

        info!(
            partition = self.partition,
            hwm = ?self.state.current_hwm(),
            last_event_time = ?self.state.last_event_time(),
            "Classifier state restored"
        );
        Ok(())
    }
}

impl<R, E> fmt::Debug for Classifier<R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Classifier {{ partition: {}, policy: {}, state: {:?}, stats: {:?} }}",
            self.partition,
            self.policy.name(),
            self.state,
            self.stats
        )
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use chrono::TimeZone;

    use crate::error::EventTimeError;
    use crate::watermark::Timestamp;

    pub(crate) fn at(h: u32, m: u32) -> Timestamp {
        chrono::Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    /// Records in these tests are their own event time.
    pub(crate) fn identity(t: &Timestamp) -> Result<Timestamp, EventTimeError> {
        Ok(*t)
    }

    /// Records that may lack an event time.
    pub(crate) fn optional(t: &Option<Timestamp>) -> Result<Timestamp, EventTimeError> {
        t.ok_or(EventTimeError::Missing)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::test_utils::{at, identity, optional};
    use super::*;
    use crate::config::{EarlyPolicyConfig, PreviousTimeTracking, Smoothing};
    use crate::error::{Error, EventTimeError, ReasonCode};
    use crate::policy::test_utils::FixedClock;

    use Classification::{Early, Late, OnTime};

    fn step_delta(max_step: TimeDelta, lateness: TimeDelta) -> ClassifierConfig {
        ClassifierConfig::new(lateness, EarlyPolicyConfig::StepDelta { max_step })
    }

    fn watermark_bound(tolerance: TimeDelta, lateness: TimeDelta) -> ClassifierConfig {
        ClassifierConfig::new(lateness, EarlyPolicyConfig::WatermarkBound { tolerance })
    }

    fn labels<R>(outcomes: &[Outcome<R>]) -> Vec<Classification> {
        outcomes
            .iter()
            .map(|o| o.as_ref().map(|c| c.classification).ok().unwrap())
            .collect()
    }

    /// Random walk around a base time with occasional large jumps in both directions.
    fn noisy_sequence(seed: u64, len: usize) -> Vec<Timestamp> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut t = at(10, 0);
        (0..len)
            .map(|_| {
                let step = if rng.random_range(0..10) == 0 {
                    rng.random_range(-7200..7200)
                } else {
                    rng.random_range(-120..180)
                };
                t += TimeDelta::seconds(step);
                t
            })
            .collect()
    }

    fn all_configs() -> Vec<ClassifierConfig> {
        let lateness = TimeDelta::minutes(5);
        vec![
            step_delta(TimeDelta::minutes(5), lateness),
            watermark_bound(TimeDelta::minutes(5), lateness),
            ClassifierConfig::new(
                lateness,
                EarlyPolicyConfig::RollingAverage {
                    tolerance: TimeDelta::minutes(5),
                    smoothing: Smoothing::Window { size: 4 },
                },
            ),
            ClassifierConfig::new(
                lateness,
                EarlyPolicyConfig::RollingAverage {
                    tolerance: TimeDelta::minutes(5),
                    smoothing: Smoothing::Exponential { alpha: 0.25 },
                },
            ),
            step_delta(TimeDelta::minutes(5), lateness)
                .with_previous_time_tracking(PreviousTimeTracking::OnTimeOnly),
            step_delta(TimeDelta::minutes(5), lateness)
                .with_previous_time_tracking(PreviousTimeTracking::EveryRecord),
        ]
    }

    #[test]
    fn test_step_delta_scenario() {
        let mut classifier = Classifier::new(
            step_delta(TimeDelta::minutes(5), TimeDelta::minutes(5)),
            identity,
        )
        .unwrap();

        let input = vec![at(10, 0), at(10, 2), at(10, 4), at(18, 0), at(10, 6)];
        let outcomes = classifier.classify_all(input);
        assert_eq!(labels(&outcomes), vec![OnTime, OnTime, OnTime, Early, OnTime]);

        // 10:06 was compared against 18:00 (the tracker moved on EARLY), the HWM never saw 18:00
        assert_eq!(classifier.current_hwm(), Some(at(10, 6)));
        assert_eq!(classifier.state().last_event_time(), Some(at(10, 6)));
    }

    #[test]
    fn test_step_delta_tracker_moves_on_early() {
        let mut classifier = Classifier::new(
            step_delta(TimeDelta::minutes(5), TimeDelta::minutes(5)),
            identity,
        )
        .unwrap();

        classifier.classify_all(vec![at(10, 0), at(10, 4)]);
        let outcome = classifier.classify(at(18, 0)).unwrap();
        assert_eq!(outcome.classification, Early);
        assert_eq!(classifier.state().last_event_time(), Some(at(18, 0)));
        assert_eq!(classifier.current_hwm(), Some(at(10, 4)));
    }

    #[test]
    fn test_on_time_only_tracking_keeps_baseline() {
        let config = step_delta(TimeDelta::minutes(5), TimeDelta::minutes(5))
            .with_previous_time_tracking(PreviousTimeTracking::OnTimeOnly);
        let mut classifier = Classifier::new(config, identity).unwrap();

        let outcomes =
            classifier.classify_all(vec![at(10, 0), at(10, 4), at(18, 0), at(18, 1), at(10, 6)]);
        // without the outlier as baseline, 18:01 is EARLY too
        assert_eq!(labels(&outcomes), vec![OnTime, OnTime, Early, Early, OnTime]);
    }

    #[test]
    fn test_lateness_scenario() {
        let mut classifier = Classifier::new(
            watermark_bound(TimeDelta::hours(1), TimeDelta::minutes(5)),
            identity,
        )
        .unwrap();

        let outcomes = classifier.classify_all(vec![at(10, 0), at(10, 3), at(9, 50), at(10, 10)]);
        assert_eq!(labels(&outcomes), vec![OnTime, OnTime, Late, OnTime]);

        let late = outcomes[2].as_ref().unwrap();
        assert_eq!(late.hwm, Some(at(10, 3)));
        assert_eq!(classifier.current_hwm(), Some(at(10, 10)));
    }

    #[test]
    fn test_late_does_not_move_tracker() {
        let mut classifier = Classifier::new(
            step_delta(TimeDelta::minutes(10), TimeDelta::minutes(5)),
            identity,
        )
        .unwrap();

        classifier.classify_all(vec![at(10, 0), at(10, 3)]);
        let late = classifier.classify(at(9, 50)).unwrap();
        assert_eq!(late.classification, Late);
        assert_eq!(classifier.state().last_event_time(), Some(at(10, 3)));
    }

    #[test]
    fn test_empty_stream() {
        let mut classifier = Classifier::new(
            step_delta(TimeDelta::minutes(5), TimeDelta::minutes(5)),
            identity,
        )
        .unwrap();

        let outcomes = classifier.classify_all(Vec::<Timestamp>::new());
        assert!(outcomes.is_empty());
        assert_eq!(classifier.stats(), ClassifierStats::default());
        assert_eq!(classifier.current_hwm(), None);
    }

    #[test]
    fn test_first_record_is_always_on_time() {
        let clock = Arc::new(FixedClock::new(at(0, 0)));
        for config in all_configs().into_iter().chain([ClassifierConfig::new(
            TimeDelta::zero(),
            EarlyPolicyConfig::WallClock {
                tolerance: TimeDelta::zero(),
            },
        )]) {
            let mut classifier =
                Classifier::with_clock(config, identity, Arc::clone(&clock) as Arc<dyn Clock>)
                    .unwrap();
            // far ahead of the (pinned) wall clock
            let outcome = classifier.classify(at(23, 0)).unwrap();
            assert_eq!(outcome.classification, OnTime, "{config:?}");
            assert_eq!(outcome.hwm, None);
            assert_eq!(classifier.current_hwm(), Some(at(23, 0)));
        }
    }

    #[test]
    fn test_wall_clock_policy_with_fixed_clock() {
        let clock = Arc::new(FixedClock::new(at(10, 0)));
        let config = ClassifierConfig::new(
            TimeDelta::minutes(5),
            EarlyPolicyConfig::WallClock {
                tolerance: TimeDelta::minutes(1),
            },
        );
        let mut classifier =
            Classifier::with_clock(config, identity, Arc::clone(&clock) as Arc<dyn Clock>).unwrap();

        let outcomes = classifier.classify_all(vec![at(9, 58), at(10, 30), at(10, 1)]);
        assert_eq!(labels(&outcomes), vec![OnTime, Early, OnTime]);

        let early = outcomes[1].as_ref().unwrap();
        assert!(matches!(
            early.diagnostic,
            Some(Diagnostic::ClockSkew { wall_clock, .. }) if wall_clock == at(10, 0)
        ));
        assert_eq!(classifier.stats().clock_skew_warnings, 1);

        // the same record is ON_TIME once the clock catches up
        clock.set(at(10, 30));
        let replay = classifier.classify(at(10, 30)).unwrap();
        assert_eq!(replay.classification, OnTime);
        assert_eq!(replay.diagnostic, None);
    }

    #[test]
    fn test_rolling_average_dampens_outlier() {
        let input = vec![at(10, 0), at(10, 1), at(10, 2), at(10, 20), at(10, 22)];

        let mut step = Classifier::new(
            step_delta(TimeDelta::minutes(5), TimeDelta::minutes(5)),
            identity,
        )
        .unwrap();
        assert_eq!(
            labels(&step.classify_all(input.clone())),
            vec![OnTime, OnTime, OnTime, Early, OnTime]
        );

        let mut rolling = Classifier::new(
            ClassifierConfig::new(
                TimeDelta::minutes(5),
                EarlyPolicyConfig::RollingAverage {
                    tolerance: TimeDelta::minutes(5),
                    smoothing: Smoothing::Window { size: 3 },
                },
            ),
            identity,
        )
        .unwrap();
        assert_eq!(
            labels(&rolling.classify_all(input)),
            vec![OnTime, OnTime, OnTime, Early, Early]
        );
    }

    #[test]
    fn test_missing_event_time_leaves_state_untouched() {
        let mut classifier = Classifier::new(
            step_delta(TimeDelta::minutes(5), TimeDelta::minutes(5)),
            optional,
        )
        .unwrap();

        classifier.classify(Some(at(10, 0))).unwrap();
        let before = *classifier.state();

        let err = classifier.classify(None).unwrap_err();
        assert_eq!(err.reason(), ReasonCode::MissingEventTime);
        assert_eq!(err.record, None);
        assert_eq!(*classifier.state(), before);

        // the stream continues
        let next = classifier.classify(Some(at(10, 1))).unwrap();
        assert_eq!(next.classification, OnTime);
        assert_eq!(next.hwm, Some(at(10, 0)));
        assert_eq!(classifier.stats().errors, 1);
        assert_eq!(classifier.stats().on_time, 2);
    }

    #[test]
    fn test_missing_first_record_does_not_bootstrap() {
        let mut classifier = Classifier::new(
            watermark_bound(TimeDelta::minutes(5), TimeDelta::minutes(5)),
            |r: &(u32, Option<Timestamp>)| r.1.ok_or(EventTimeError::Invalid("bad".to_string())),
        )
        .unwrap();

        let err = classifier.classify((1, None)).unwrap_err();
        assert_eq!(err.reason(), ReasonCode::InvalidEventTime);
        assert_eq!(classifier.current_hwm(), None);

        // the first *valid* record bootstraps
        let first = classifier.classify((2, Some(at(12, 0)))).unwrap();
        assert_eq!(first.classification, OnTime);
    }

    #[test]
    fn test_invalid_config_fails_fast() {
        let config = step_delta(TimeDelta::minutes(5), TimeDelta::minutes(-5));
        assert!(matches!(
            Classifier::new(config, identity),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_oversized_window_fails_fast() {
        let config = ClassifierConfig::new(
            TimeDelta::minutes(5),
            EarlyPolicyConfig::RollingAverage {
                tolerance: TimeDelta::minutes(1),
                smoothing: Smoothing::Window { size: usize::MAX },
            },
        );
        assert!(matches!(
            Classifier::new(config, identity),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_properties_hold_for_noisy_input() {
        for seed in 0..5 {
            let input = noisy_sequence(seed, 500);
            for config in all_configs() {
                let mut classifier = Classifier::new(config, identity).unwrap();
                let mut previous_hwm = None;

                for (idx, t) in input.iter().enumerate() {
                    let hwm_before = classifier.current_hwm();
                    let outcome = classifier.classify(*t).unwrap();
                    let hwm_after = classifier.current_hwm();

                    // self-exclusion: the HWM used is the one from before the record
                    assert_eq!(outcome.hwm, hwm_before);
                    // monotonicity
                    assert!(hwm_after >= previous_hwm);
                    previous_hwm = hwm_after;

                    match outcome.classification {
                        Early | Late => assert_eq!(hwm_before, hwm_after),
                        OnTime => {
                            assert_eq!(hwm_after, hwm_before.max(Some(*t)));
                        }
                    }
                    if idx == 0 {
                        assert_eq!(outcome.classification, OnTime);
                    }
                }

                let stats = classifier.stats();
                assert_eq!(stats.total(), input.len() as u64);
            }
        }
    }

    #[test]
    fn test_replay_is_deterministic() {
        let input = noisy_sequence(42, 1000);
        for config in all_configs() {
            let mut first = Classifier::new(config, identity).unwrap();
            let mut second = Classifier::new(config, identity).unwrap();

            let a = labels(&first.classify_all(input.clone()));
            let b = labels(&second.classify_all(input.clone()));
            assert_eq!(a, b, "{config:?}");
            assert_eq!(first.snapshot(), second.snapshot());
        }
    }

    #[test]
    fn test_snapshot_restore_resumes_identically() {
        let input = noisy_sequence(7, 400);
        let (head, tail) = input.split_at(200);

        for config in all_configs() {
            let mut uninterrupted = Classifier::new(config, identity).unwrap();
            let expected = labels(&uninterrupted.classify_all(input.clone()));

            let mut before_crash = Classifier::new(config, identity).unwrap();
            let mut got = labels(&before_crash.classify_all(head.to_vec()));
            let blob = before_crash.snapshot();
            drop(before_crash);

            let mut recovered = Classifier::new(config, identity).unwrap();
            recovered.restore(&blob).unwrap();
            got.extend(labels(&recovered.classify_all(tail.to_vec())));

            assert_eq!(got, expected, "{config:?}");
        }
    }

    #[test]
    fn test_restore_failure_leaves_state_untouched() {
        let mut source = Classifier::new(
            ClassifierConfig::new(
                TimeDelta::minutes(5),
                EarlyPolicyConfig::RollingAverage {
                    tolerance: TimeDelta::minutes(5),
                    smoothing: Smoothing::Window { size: 3 },
                },
            ),
            identity,
        )
        .unwrap();
        source.classify_all(vec![at(8, 0), at(8, 1)]);
        let rolling_blob = source.snapshot();

        let mut target = Classifier::new(
            step_delta(TimeDelta::minutes(5), TimeDelta::minutes(5)),
            identity,
        )
        .unwrap();
        target.classify_all(vec![at(10, 0), at(10, 1)]);
        let before = *target.state();

        // policy state of a different kind
        assert!(matches!(
            target.restore(&rolling_blob),
            Err(Error::Snapshot(_))
        ));
        assert_eq!(*target.state(), before);

        // corrupt bytes
        let garbage = WatermarkStateBlob::from(vec![0xff, 0xff]);
        assert!(target.restore(&garbage).is_err());
        assert_eq!(*target.state(), before);
    }
}
