use std::collections::HashMap;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::classifier::actor::ClassifierHandle;
use crate::classifier::{Classifier, ClassifierStats, Outcome};
use crate::config::ClassifierConfig;
use crate::error::Error;
use crate::message::EventTimeExtractor;
use crate::watermark::{Timestamp, WatermarkStateBlob};
use crate::Result;

/// Independent classifiers, one per partition, each with its own HWM and its own task. Records
/// of one partition never influence another, and there is no global ordering across partitions.
pub struct PartitionedClassifier<R> {
    handles: HashMap<u16, ClassifierHandle<R>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<R> PartitionedClassifier<R>
where
    R: Send + 'static,
{
    /// Creates one classifier per partition in `partitions`, all with the same config.
    /// `make_extractor` is called once per partition.
    pub fn new<E, F>(
        partitions: impl IntoIterator<Item = u16>,
        config: &ClassifierConfig,
        make_extractor: F,
        capacity: usize,
    ) -> Result<Self>
    where
        E: EventTimeExtractor<R> + Send + 'static,
        F: Fn(u16) -> E,
    {
        let mut handles = HashMap::new();
        let mut tasks = vec![];
        for partition in partitions {
            if handles.contains_key(&partition) {
                return Err(Error::Partition(format!(
                    "partition {partition} is listed twice"
                )));
            }
            let classifier =
                Classifier::new(*config, make_extractor(partition))?.with_partition(partition);
            let (handle, task) = ClassifierHandle::new(classifier, capacity);
            handles.insert(partition, handle);
            tasks.push(task);
        }

        info!(partitions = handles.len(), "Started partitioned classifier");
        Ok(Self { handles, tasks })
    }

    fn handle(&self, partition: u16) -> Result<&ClassifierHandle<R>> {
        self.handles
            .get(&partition)
            .ok_or_else(|| Error::Partition(format!("unknown partition {partition}")))
    }

    /// Cloneable handle to a single partition, for callers that drive partitions concurrently.
    pub fn partition(&self, partition: u16) -> Result<ClassifierHandle<R>> {
        self.handle(partition).cloned()
    }

    pub fn partitions(&self) -> Vec<u16> {
        let mut partitions: Vec<u16> = self.handles.keys().copied().collect();
        partitions.sort_unstable();
        partitions
    }

    pub async fn classify(&self, partition: u16, record: R) -> Result<Outcome<R>> {
        self.handle(partition)?.classify(record).await
    }

    pub async fn current_hwm(&self, partition: u16) -> Result<Option<Timestamp>> {
        self.handle(partition)?.current_hwm().await
    }

    pub async fn stats(&self, partition: u16) -> Result<ClassifierStats> {
        self.handle(partition)?.stats().await
    }

    /// Snapshots every partition, ordered by partition.
    pub async fn snapshot_all(&self) -> Result<Vec<(u16, WatermarkStateBlob)>> {
        let mut blobs = vec![];
        for partition in self.partitions() {
            blobs.push((partition, self.handle(partition)?.snapshot().await?));
        }
        Ok(blobs)
    }

    pub async fn restore(&self, partition: u16, blob: WatermarkStateBlob) -> Result<()> {
        self.handle(partition)?.restore(blob).await
    }

    /// Drops all handles held here and waits for the partition tasks to finish. Tasks keep
    /// running while handles obtained through [PartitionedClassifier::partition] are alive.
    pub async fn shutdown(self) -> Result<()> {
        drop(self.handles);
        for task in self.tasks {
            task.await.map_err(|e| {
                error!(?e, "Classifier task failed");
                Error::Partition(format!("classifier task failed: {e}"))
            })?;
        }
        info!("Partitioned classifier stopped");
        Ok(())
    }
}
