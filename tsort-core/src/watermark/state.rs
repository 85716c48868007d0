use chrono::TimeDelta;

use crate::watermark::Timestamp;

/// WatermarkState holds the HWM and the event time of the previously tracked record of one
/// partition. Only the [crate::Classifier] mutates it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatermarkState {
    /// None until the first record has been accepted.
    hwm: Option<Timestamp>,
    /// Event time of the last record that the previous-time tracker observed. The step-delta
    /// policy compares against this value, not against the HWM.
    last_event_time: Option<Timestamp>,
}

impl WatermarkState {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(hwm: Option<Timestamp>, last_event_time: Option<Timestamp>) -> Self {
        Self {
            hwm,
            last_event_time,
        }
    }

    pub fn current_hwm(&self) -> Option<Timestamp> {
        self.hwm
    }

    pub fn last_event_time(&self) -> Option<Timestamp> {
        self.last_event_time
    }

    /// `hwm - lateness`. Anything strictly older is LATE. None before the first record, or when
    /// the subtraction leaves the representable range.
    pub fn late_threshold(&self, lateness: TimeDelta) -> Option<Timestamp> {
        self.hwm.and_then(|hwm| hwm.checked_sub_signed(lateness))
    }

    /// `hwm + tolerance`. Anything strictly newer is EARLY for the watermark-bound policy.
    pub fn early_threshold(&self, tolerance: TimeDelta) -> Option<Timestamp> {
        self.hwm.and_then(|hwm| hwm.checked_add_signed(tolerance))
    }

    /// Moves the HWM forward to `candidate`. A candidate at or behind the current HWM is a no-op,
    /// so repeated calls are idempotent. Must only be called for ON_TIME records.
    pub(crate) fn advance(&mut self, candidate: Timestamp) {
        match self.hwm {
            Some(hwm) if candidate <= hwm => {}
            _ => self.hwm = Some(candidate),
        }
    }

    /// Records the event time of the record just classified, for the step-delta comparison of
    /// the next record.
    pub(crate) fn track_previous(&mut self, event_time: Timestamp) {
        self.last_event_time = Some(event_time);
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(h: u32, m: u32) -> Timestamp {
        chrono::Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_new_state_is_empty() {
        let state = WatermarkState::new();
        assert_eq!(state.current_hwm(), None);
        assert_eq!(state.last_event_time(), None);
        assert_eq!(state.late_threshold(TimeDelta::minutes(5)), None);
        assert_eq!(state.early_threshold(TimeDelta::minutes(5)), None);
    }

    #[test]
    fn test_advance_is_monotonic() {
        let mut state = WatermarkState::new();
        state.advance(at(10, 0));
        assert_eq!(state.current_hwm(), Some(at(10, 0)));

        state.advance(at(10, 5));
        assert_eq!(state.current_hwm(), Some(at(10, 5)));

        // going backwards is a no-op
        state.advance(at(9, 0));
        assert_eq!(state.current_hwm(), Some(at(10, 5)));

        // so is advancing to the same value
        state.advance(at(10, 5));
        assert_eq!(state.current_hwm(), Some(at(10, 5)));
    }

    #[test]
    fn test_thresholds_follow_hwm() {
        let mut state = WatermarkState::new();
        state.advance(at(10, 0));
        assert_eq!(state.late_threshold(TimeDelta::minutes(5)), Some(at(9, 55)));
        assert_eq!(state.early_threshold(TimeDelta::minutes(5)), Some(at(10, 5)));

        // never cached across updates
        state.advance(at(11, 0));
        assert_eq!(state.late_threshold(TimeDelta::minutes(5)), Some(at(10, 55)));
        assert_eq!(state.early_threshold(TimeDelta::minutes(5)), Some(at(11, 5)));
    }

    #[test]
    fn test_track_previous_is_independent_of_hwm() {
        let mut state = WatermarkState::new();
        state.advance(at(10, 0));
        state.track_previous(at(18, 0));
        assert_eq!(state.current_hwm(), Some(at(10, 0)));
        assert_eq!(state.last_event_time(), Some(at(18, 0)));

        state.track_previous(at(9, 0));
        assert_eq!(state.last_event_time(), Some(at(9, 0)));
    }
}
