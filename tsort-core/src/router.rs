//! Three-way fan-out of classified records. Each class gets its own bounded channel so that a
//! slow consumer of one class applies backpressure to the classifier instead of buffering.
//!
//! ```text
//!                              +---------+
//!                         +--> | on_time | -->
//!                         |    +---------+
//! +------------+          |    +---------+
//! | Classifier | --route--+--> |  early  | -->
//! +------------+          |    +---------+
//!                         |    +---------+
//!                         +--> |  late   | -->
//!                         |    +---------+
//!                         |    +---------+
//!                         +--> | errors  | -->
//!                              +---------+
//! ```
//!
//! Arrival order is preserved within each class. [Partitioned] is the synchronous, in-memory
//! counterpart for batch callers.

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::error;

use crate::classifier::{Classification, Classified, Classifier, Outcome};
use crate::error::{Error, RecordError};
use crate::message::EventTimeExtractor;
use crate::policy::Diagnostic;
use crate::Result;

/// Sending half of the three-way route.
pub struct Router<R> {
    on_time: mpsc::Sender<Classified<R>>,
    early: mpsc::Sender<Classified<R>>,
    late: mpsc::Sender<Classified<R>>,
    errors: mpsc::Sender<RecordError<R>>,
    diagnostics: Option<mpsc::Sender<Diagnostic>>,
}

/// Receiving half of the three-way route, one stream per class plus the error stream.
pub struct RouterReceivers<R> {
    pub on_time: ReceiverStream<Classified<R>>,
    pub early: ReceiverStream<Classified<R>>,
    pub late: ReceiverStream<Classified<R>>,
    pub errors: ReceiverStream<RecordError<R>>,
}

impl<R> Router<R> {
    /// Creates the router and its receivers, every channel bounded by `capacity`.
    pub fn channel(capacity: usize) -> (Self, RouterReceivers<R>) {
        let (on_time_tx, on_time_rx) = mpsc::channel(capacity);
        let (early_tx, early_rx) = mpsc::channel(capacity);
        let (late_tx, late_rx) = mpsc::channel(capacity);
        let (errors_tx, errors_rx) = mpsc::channel(capacity);

        let router = Self {
            on_time: on_time_tx,
            early: early_tx,
            late: late_tx,
            errors: errors_tx,
            diagnostics: None,
        };
        let receivers = RouterReceivers {
            on_time: ReceiverStream::new(on_time_rx),
            early: ReceiverStream::new(early_rx),
            late: ReceiverStream::new(late_rx),
            errors: ReceiverStream::new(errors_rx),
        };
        (router, receivers)
    }

    /// Also forwards every [Diagnostic] to `diagnostics`. The record itself is still routed.
    pub fn with_diagnostics(mut self, diagnostics: mpsc::Sender<Diagnostic>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Sends the outcome to the channel of its class, waiting for capacity. A closed channel is
    /// an error, the downstream it feeds is gone.
    pub async fn route(&self, outcome: Outcome<R>) -> Result<()> {
        let classified = match outcome {
            Ok(classified) => classified,
            Err(record_error) => {
                return self
                    .errors
                    .send(record_error)
                    .await
                    .map_err(|_| closed("errors"));
            }
        };

        if let (Some(tx), Some(diagnostic)) = (&self.diagnostics, &classified.diagnostic) {
            tx.send(diagnostic.clone())
                .await
                .map_err(|_| closed("diagnostics"))?;
        }

        let (tx, name) = match classified.classification {
            Classification::OnTime => (&self.on_time, "on_time"),
            Classification::Early => (&self.early, "early"),
            Classification::Late => (&self.late, "late"),
        };
        tx.send(classified).await.map_err(|_| closed(name))
    }
}

pub(crate) fn closed(channel: &str) -> Error {
    error!(channel, "Downstream channel is closed");
    Error::Forwarder(format!("{channel} channel is closed"))
}

/// In-memory three-way partition of a batch. Every input lands in exactly one of the four
/// vectors.
#[derive(Debug)]
pub struct Partitioned<R> {
    pub on_time: Vec<Classified<R>>,
    pub early: Vec<Classified<R>>,
    pub late: Vec<Classified<R>>,
    pub errors: Vec<RecordError<R>>,
}

impl<R> Default for Partitioned<R> {
    fn default() -> Self {
        Self {
            on_time: vec![],
            early: vec![],
            late: vec![],
            errors: vec![],
        }
    }
}

impl<R> Partitioned<R> {
    pub fn push(&mut self, outcome: Outcome<R>) {
        match outcome {
            Ok(classified) => match classified.classification {
                Classification::OnTime => self.on_time.push(classified),
                Classification::Early => self.early.push(classified),
                Classification::Late => self.late.push(classified),
            },
            Err(record_error) => self.errors.push(record_error),
        }
    }

    pub fn len(&self) -> usize {
        self.on_time.len() + self.early.len() + self.late.len() + self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Classifies `records` in order and partitions the outcomes.
    pub fn collect_from<E, I>(classifier: &mut Classifier<R, E>, records: I) -> Self
    where
        E: EventTimeExtractor<R>,
        I: IntoIterator<Item = R>,
    {
        let mut partitioned = Self::default();
        for record in records {
            partitioned.push(classifier.classify(record));
        }
        partitioned
    }
}
