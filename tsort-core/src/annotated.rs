use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::classifier::{Classification, Classified, Classifier, Outcome};
use crate::error::RecordError;
use crate::message::EventTimeExtractor;
use crate::router::closed;
use crate::watermark::Timestamp;
use crate::Result;

/// A record emitted in annotated-stream mode. `hwm` is the HWM the record was tested against,
/// None for the record that bootstrapped it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedRecord<R> {
    pub record: R,
    pub label: Classification,
    pub event_time: Timestamp,
    pub hwm: Option<Timestamp>,
}

impl<R> From<Classified<R>> for AnnotatedRecord<R> {
    fn from(classified: Classified<R>) -> Self {
        Self {
            record: classified.record,
            label: classified.classification,
            event_time: classified.event_time,
            hwm: classified.hwm,
        }
    }
}

/// Emits every classified record once, in input order, on a single channel. Records whose event
/// time cannot be read go to the error channel as in routed mode.
pub struct Annotator<R> {
    out: mpsc::Sender<AnnotatedRecord<R>>,
    errors: mpsc::Sender<RecordError<R>>,
}

impl<R> Annotator<R> {
    pub fn channel(
        capacity: usize,
    ) -> (
        Self,
        ReceiverStream<AnnotatedRecord<R>>,
        ReceiverStream<RecordError<R>>,
    ) {
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let (errors_tx, errors_rx) = mpsc::channel(capacity);
        (
            Self {
                out: out_tx,
                errors: errors_tx,
            },
            ReceiverStream::new(out_rx),
            ReceiverStream::new(errors_rx),
        )
    }

    pub async fn emit(&self, outcome: Outcome<R>) -> Result<()> {
        match outcome {
            Ok(classified) => self
                .out
                .send(classified.into())
                .await
                .map_err(|_| closed("annotated")),
            Err(record_error) => self
                .errors
                .send(record_error)
                .await
                .map_err(|_| closed("errors")),
        }
    }
}

/// Classifies `records` in order, returning the annotated records and the rejected ones.
pub fn annotate_all<R, E, I>(
    classifier: &mut Classifier<R, E>,
    records: I,
) -> (Vec<AnnotatedRecord<R>>, Vec<RecordError<R>>)
where
    E: EventTimeExtractor<R>,
    I: IntoIterator<Item = R>,
{
    let mut annotated = vec![];
    let mut errors = vec![];
    for record in records {
        match classifier.classify(record) {
            Ok(classified) => annotated.push(classified.into()),
            Err(record_error) => errors.push(record_error),
        }
    }
    (annotated, errors)
}
