//! Records are opaque to the classifier except for their event time, which is read through an
//! [EventTimeExtractor]. Any record type works; [Message] is the concrete record used when the
//! payload is raw bytes (e.g., a JSON line).

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::EventTimeError;
use crate::watermark::Timestamp;

/// Reads the event time of a record. A failure diverts the record to the error path.
pub trait EventTimeExtractor<R> {
    fn event_time(&self, record: &R) -> Result<Timestamp, EventTimeError>;
}

impl<R, F> EventTimeExtractor<R> for F
where
    F: Fn(&R) -> Result<Timestamp, EventTimeError>,
{
    fn event_time(&self, record: &R) -> Result<Timestamp, EventTimeError> {
        self(record)
    }
}

/// A record with a bytes payload. It is cheap to clone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    /// position of the message in its input, used to correlate outputs with inputs
    pub offset: u64,
    pub value: Bytes,
    /// event time attached by the producer, if it was carried outside the payload
    pub event_time: Option<Timestamp>,
}

impl Message {
    pub fn new(offset: u64, value: impl Into<Bytes>) -> Self {
        Self {
            offset,
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn with_event_time(mut self, event_time: Timestamp) -> Self {
        self.event_time = Some(event_time);
        self
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message {{ offset: {}, event_time: {:?}, len: {} }}",
            self.offset,
            self.event_time,
            self.value.len()
        )
    }
}

/// Uses [Message::event_time].
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageEventTime;

impl EventTimeExtractor<Message> for MessageEventTime {
    fn event_time(&self, record: &Message) -> Result<Timestamp, EventTimeError> {
        record.event_time.ok_or(EventTimeError::Missing)
    }
}

/// Reads the event time from a top-level field of a JSON payload. The field may be an RFC 3339
/// string or an integer number of milliseconds since the epoch.
#[derive(Debug, Clone)]
pub struct JsonFieldExtractor {
    field: String,
}

impl JsonFieldExtractor {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    fn parse(&self, value: &Value) -> Result<Timestamp, EventTimeError> {
        match value {
            Value::Null => Err(EventTimeError::Missing),
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| EventTimeError::Invalid(format!("{}: {e}", self.field))),
            Value::Number(n) => n
                .as_i64()
                .and_then(DateTime::from_timestamp_millis)
                .ok_or_else(|| {
                    EventTimeError::Invalid(format!("{}: {n} is not epoch millis", self.field))
                }),
            other => Err(EventTimeError::Invalid(format!(
                "{}: unsupported value {other}",
                self.field
            ))),
        }
    }
}

impl EventTimeExtractor<Message> for JsonFieldExtractor {
    fn event_time(&self, record: &Message) -> Result<Timestamp, EventTimeError> {
        let payload: Value = serde_json::from_slice(&record.value)
            .map_err(|e| EventTimeError::Invalid(format!("payload is not JSON: {e}")))?;

        match payload.get(&self.field) {
            Some(value) => self.parse(value),
            None => Err(EventTimeError::Missing),
        }
    }
}
