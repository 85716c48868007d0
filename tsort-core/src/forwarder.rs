//! The forwarder drives one partition: it reads records from an input stream, classifies them one
//! at a time and hands each outcome to the configured output.
//!
//! ```text
//! (input) --[c]--> {classifier} --+--[c]--> on_time  |
//!                                 +--[c]--> early    |  three_way_route
//!                                 +--[c]--> late     |
//!                                 +--[c]--> errors
//!
//! (input) --[c]--> {classifier} --+--[c]--> annotated | annotated_stream
//!                                 +--[c]--> errors
//!
//! [c] - channel
//! {}  - owned by the forwarder task
//! ```
//!
//! It stops when the input ends or the cancellation token fires, and hands the classifier back so
//! the caller can snapshot it.

use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::annotated::Annotator;
use crate::classifier::{Classifier, Outcome};
use crate::config::OutputMode;
use crate::error::Error;
use crate::message::EventTimeExtractor;
use crate::router::Router;
use crate::Result;

/// Where classified records go. Must match the configured [OutputMode].
pub enum Output<R> {
    Routed(Router<R>),
    Annotated(Annotator<R>),
}

impl<R> Output<R> {
    fn mode(&self) -> OutputMode {
        match self {
            Output::Routed(_) => OutputMode::ThreeWayRoute,
            Output::Annotated(_) => OutputMode::AnnotatedStream,
        }
    }

    async fn send(&self, outcome: Outcome<R>) -> Result<()> {
        match self {
            Output::Routed(router) => router.route(outcome).await,
            Output::Annotated(annotator) => annotator.emit(outcome).await,
        }
    }
}

pub struct Forwarder<R, E> {
    classifier: Classifier<R, E>,
    output: Output<R>,
}

impl<R, E> Forwarder<R, E>
where
    E: EventTimeExtractor<R>,
{
    pub fn new(classifier: Classifier<R, E>, output: Output<R>) -> Result<Self> {
        if classifier.mode() != output.mode() {
            return Err(Error::Config(format!(
                "classifier is configured for {:?} but the output is {:?}",
                classifier.mode(),
                output.mode()
            )));
        }
        Ok(Self { classifier, output })
    }

    /// Forwards until the input ends or `cln_token` is cancelled. Returns the classifier with its
    /// final state. The outputs are closed on return.
    pub async fn start<S>(self, input: S, cln_token: CancellationToken) -> Result<Classifier<R, E>>
    where
        S: Stream<Item = R> + Unpin,
    {
        let Forwarder {
            mut classifier,
            output,
        } = self;
        let mut input = input;

        info!(
            partition = classifier.partition(),
            mode = ?classifier.mode(),
            "Starting forwarder"
        );

        loop {
            tokio::select! {
                biased;
                _ = cln_token.cancelled() => {
                    info!(
                        partition = classifier.partition(),
                        "Cancellation token received, stopping forwarder"
                    );
                    break;
                }
                record = input.next() => {
                    let Some(record) = record else {
                        break;
                    };
                    let outcome = classifier.classify(record);
                    if let Err(e) = output.send(outcome).await {
                        error!(?e, partition = classifier.partition(), "Failed to forward record");
                        return Err(e);
                    }
                }
            }
        }

        info!(
            partition = classifier.partition(),
            stats = ?classifier.stats(),
            hwm = ?classifier.current_hwm(),
            "Forwarder stopped"
        );
        Ok(classifier)
    }
}

impl<R, E> Forwarder<R, E>
where
    R: Send + 'static,
    E: EventTimeExtractor<R> + Send + 'static,
{
    /// Spawns [Forwarder::start] on its own task.
    pub fn streaming_forward(
        self,
        input: ReceiverStream<R>,
        cln_token: CancellationToken,
    ) -> JoinHandle<Result<Classifier<R, E>>> {
        tokio::spawn(async move { self.start(input, cln_token).await })
    }
}
