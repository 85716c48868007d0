use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Config Error - {0}")]
    Config(String),

    #[error("Snapshot Error - {0}")]
    Snapshot(String),

    #[error("Partition Error - {0}")]
    Partition(String),

    #[error("Forwarder Error - {0}")]
    Forwarder(String),

    #[error("Metrics Error - {0}")]
    Metrics(String),

    #[error("Classifier Actor Error - {0}")]
    Actor(String),

    #[error("OneShot Receiver Error - {0}")]
    ActorPatternRecv(String),
}

/// Why a single record could not be classified. The record is diverted to the error path and the
/// stream continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonCode {
    MissingEventTime,
    InvalidEventTime,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::MissingEventTime => "missing_event_time",
            ReasonCode::InvalidEventTime => "invalid_event_time",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to read the event time from a record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventTimeError {
    #[error("event time is missing")]
    Missing,

    #[error("event time is invalid - {0}")]
    Invalid(String),
}

impl EventTimeError {
    pub fn reason(&self) -> ReasonCode {
        match self {
            EventTimeError::Missing => ReasonCode::MissingEventTime,
            EventTimeError::Invalid(_) => ReasonCode::InvalidEventTime,
        }
    }
}

/// A record rejected into the error path, together with the reason. Rejection never touches the
/// watermark state.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordError<R> {
    pub record: R,
    pub error: EventTimeError,
}

impl<R> RecordError<R> {
    pub fn reason(&self) -> ReasonCode {
        self.error.reason()
    }
}

impl<R> fmt::Display for RecordError<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.reason())
    }
}
