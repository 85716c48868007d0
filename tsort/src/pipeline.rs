//! Wires stdin to the classifier and the classifier to the JSON-lines writers.
//!
//! ```text
//! (reader) --[c]--> (forwarder) --+--[c]--> (pump) --+--[c]--> (writer) --> destination
//!                                 +--[c]--> (pump) --+
//!                                 +--[c]--> (pump) --+
//! ```

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tsort_core::{
    Annotator, Classifier, ClassifierStats, Forwarder, JsonFieldExtractor, Message, Output,
    OutputMode, Router, Timestamp, metrics,
};

use crate::checkpoint;
use crate::cmdline::Settings;
use crate::error::{Error, Result};
use crate::output::{self, Writers, pump};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Summary {
    pub(crate) read: u64,
    pub(crate) written: u64,
    pub(crate) stats: ClassifierStats,
    pub(crate) hwm: Option<Timestamp>,
}

/// Classifies every line of `input` until it ends or `cln_token` is cancelled. The checkpoint is
/// written only after all outputs are flushed.
pub(crate) async fn run<Rd>(
    settings: Settings,
    input: Rd,
    cln_token: CancellationToken,
) -> Result<Summary>
where
    Rd: AsyncBufRead + Unpin + Send + 'static,
{
    let extractor = JsonFieldExtractor::new(settings.event_time_field.clone());
    let mut classifier = Classifier::new(settings.config, extractor)?;
    if let Some(path) = &settings.checkpoint {
        if let Some(blob) = checkpoint::load(path).await? {
            classifier.restore(&blob)?;
        }
    }

    let mut writers = Writers::new(settings.capacity);
    let mut pumps = vec![];
    let errors_tx = writers.sender(&settings.error_out).await?;

    let output = match settings.config.mode {
        OutputMode::ThreeWayRoute => {
            output::log_destinations(&[
                ("on_time", &settings.on_time_out),
                ("early", &settings.early_out),
                ("late", &settings.late_out),
                ("errors", &settings.error_out),
            ]);
            let (router, receivers) = Router::channel(settings.capacity);
            pumps.push(pump(
                receivers.on_time,
                writers.sender(&settings.on_time_out).await?,
                output::classified_line,
            ));
            pumps.push(pump(
                receivers.early,
                writers.sender(&settings.early_out).await?,
                output::classified_line,
            ));
            pumps.push(pump(
                receivers.late,
                writers.sender(&settings.late_out).await?,
                output::classified_line,
            ));
            pumps.push(pump(receivers.errors, errors_tx, output::error_line));
            Output::Routed(router)
        }
        OutputMode::AnnotatedStream => {
            output::log_destinations(&[
                ("annotated", &settings.annotated_out),
                ("errors", &settings.error_out),
            ]);
            let (annotator, annotated, errors) = Annotator::channel(settings.capacity);
            pumps.push(pump(
                annotated,
                writers.sender(&settings.annotated_out).await?,
                output::annotated_line,
            ));
            pumps.push(pump(errors, errors_tx, output::error_line));
            Output::Annotated(annotator)
        }
    };

    let forwarder = Forwarder::new(classifier, output)?;
    let (input_tx, input_rx) = mpsc::channel(settings.capacity);
    let reader = tokio::spawn(read_records(input, input_tx, cln_token.clone()));
    let forwarder = forwarder.streaming_forward(ReceiverStream::new(input_rx), cln_token);

    let classifier = forwarder
        .await
        .map_err(|e| Error::Task(format!("forwarder task failed: {e}")))??;
    let read = reader
        .await
        .map_err(|e| Error::Task(format!("reader task failed: {e}")))??;
    for task in pumps {
        task.await
            .map_err(|e| Error::Task(format!("output task failed: {e}")))??;
    }
    let written = writers.finish().await?;

    if let Some(path) = &settings.checkpoint {
        checkpoint::store(path, &classifier.snapshot()).await?;
    }
    if let Some(path) = &settings.metrics_out {
        tokio::fs::write(path, metrics::encode_metrics()?).await?;
    }

    Ok(Summary {
        read,
        written,
        stats: classifier.stats(),
        hwm: classifier.current_hwm(),
    })
}

/// Turns every non-empty line into a [Message] whose offset is its position among the records.
async fn read_records<Rd>(
    input: Rd,
    tx: mpsc::Sender<Message>,
    cln_token: CancellationToken,
) -> Result<u64>
where
    Rd: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut offset = 0;
    loop {
        let line = tokio::select! {
            biased;
            _ = cln_token.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        if tx.send(Message::new(offset, line)).await.is_err() {
            warn!(offset, "Forwarder stopped, no longer reading input");
            break;
        }
        offset += 1;
    }
    info!(read = offset, "Finished reading input");
    Ok(offset)
}
