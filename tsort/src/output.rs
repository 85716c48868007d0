//! JSON-lines writers. Every destination gets exactly one writer task; several record streams may
//! feed the same destination, in which case lines of different streams interleave but each stream
//! keeps its own order.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};
use tsort_core::{AnnotatedRecord, Classification, Classified, Message, RecordError, Timestamp};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Destination {
    Stdout,
    Stderr,
    File(PathBuf),
}

/// One writer task per [Destination].
pub(crate) struct Writers {
    capacity: usize,
    senders: HashMap<Destination, mpsc::Sender<String>>,
    tasks: Vec<JoinHandle<Result<u64>>>,
}

impl Writers {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            senders: HashMap::new(),
            tasks: vec![],
        }
    }

    /// Returns the line sender of `destination`, opening it on first use. Files are truncated.
    pub(crate) async fn sender(&mut self, destination: &Destination) -> Result<mpsc::Sender<String>> {
        if let Some(tx) = self.senders.get(destination) {
            return Ok(tx.clone());
        }

        let writer: Box<dyn AsyncWrite + Unpin + Send> = match destination {
            Destination::Stdout => Box::new(tokio::io::stdout()),
            Destination::Stderr => Box::new(tokio::io::stderr()),
            Destination::File(path) => Box::new(tokio::fs::File::create(path).await?),
        };

        let (tx, rx) = mpsc::channel(self.capacity);
        self.tasks
            .push(tokio::spawn(write_lines(destination.clone(), writer, rx)));
        self.senders.insert(destination.clone(), tx.clone());
        Ok(tx)
    }

    /// Closes all destinations once their senders are gone and waits for the writes to be flushed.
    pub(crate) async fn finish(self) -> Result<u64> {
        drop(self.senders);
        let mut written = 0;
        for task in self.tasks {
            written += task
                .await
                .map_err(|e| Error::Task(format!("writer task failed: {e}")))??;
        }
        Ok(written)
    }
}

async fn write_lines(
    destination: Destination,
    writer: Box<dyn AsyncWrite + Unpin + Send>,
    mut rx: mpsc::Receiver<String>,
) -> Result<u64> {
    let mut writer = BufWriter::new(writer);
    let mut written = 0;
    while let Some(line) = rx.recv().await {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        written += 1;
    }
    writer.flush().await?;
    debug!(?destination, written, "Writer finished");
    Ok(written)
}

/// Renders every item of `stream` as one line and sends it to a writer.
pub(crate) fn pump<T, F>(
    stream: ReceiverStream<T>,
    tx: mpsc::Sender<String>,
    render: F,
) -> JoinHandle<Result<()>>
where
    T: Send + 'static,
    F: Fn(T) -> Result<String> + Send + 'static,
{
    tokio::spawn(async move {
        let mut stream = stream;
        while let Some(item) = stream.next().await {
            let line = render(item)?;
            tx.send(line)
                .await
                .map_err(|_| Error::Task("writer stopped before its input ended".to_string()))?;
        }
        Ok(())
    })
}

/// The payload as JSON, or as a string if it is not valid JSON.
fn payload(message: &Message) -> Value {
    serde_json::from_slice(&message.value)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&message.value).into_owned()))
}

#[derive(Serialize)]
struct ClassifiedLine {
    offset: u64,
    class: Classification,
    event_time: Timestamp,
    hwm: Option<Timestamp>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    clock_skew: bool,
    record: Value,
}

#[derive(Serialize)]
struct ErrorLine {
    offset: u64,
    reason: &'static str,
    error: String,
    record: Value,
}

pub(crate) fn classified_line(classified: Classified<Message>) -> Result<String> {
    let line = ClassifiedLine {
        offset: classified.record.offset,
        class: classified.classification,
        event_time: classified.event_time,
        hwm: classified.hwm,
        clock_skew: classified.diagnostic.is_some(),
        record: payload(&classified.record),
    };
    Ok(serde_json::to_string(&line)?)
}

pub(crate) fn annotated_line(annotated: AnnotatedRecord<Message>) -> Result<String> {
    let offset = annotated.record.offset;
    let line = AnnotatedRecord {
        record: payload(&annotated.record),
        label: annotated.label,
        event_time: annotated.event_time,
        hwm: annotated.hwm,
    };
    let mut value = serde_json::to_value(&line)?;
    if let Value::Object(fields) = &mut value {
        fields.insert("offset".to_string(), offset.into());
    }
    Ok(serde_json::to_string(&value)?)
}

pub(crate) fn error_line(record_error: RecordError<Message>) -> Result<String> {
    let line = ErrorLine {
        offset: record_error.record.offset,
        reason: record_error.reason().as_str(),
        error: record_error.error.to_string(),
        record: payload(&record_error.record),
    };
    Ok(serde_json::to_string(&line)?)
}

/// Reports what was written where.
pub(crate) fn log_destinations(destinations: &[(&str, &Destination)]) {
    for (stream, destination) in destinations {
        info!(stream, ?destination, "Output destination");
    }
}
