//! Single-writer access to a [Classifier] from async code. The classifier is moved into a task
//! that owns it exclusively; callers talk to it through a cloneable [ClassifierHandle]. Requests
//! are served in the order they are received, which is the order records are classified in.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::info;

use crate::classifier::{Classifier, ClassifierStats, Outcome};
use crate::error::Error;
use crate::message::EventTimeExtractor;
use crate::watermark::{Timestamp, WatermarkStateBlob};
use crate::Result;

enum ActorMessage<R> {
    Classify {
        record: R,
        respond_to: oneshot::Sender<Outcome<R>>,
    },
    Snapshot {
        respond_to: oneshot::Sender<WatermarkStateBlob>,
    },
    Restore {
        blob: WatermarkStateBlob,
        respond_to: oneshot::Sender<Result<()>>,
    },
    Stats {
        respond_to: oneshot::Sender<ClassifierStats>,
    },
    CurrentHwm {
        respond_to: oneshot::Sender<Option<Timestamp>>,
    },
}

struct ClassifierActor<R, E> {
    classifier: Classifier<R, E>,
    receiver: mpsc::Receiver<ActorMessage<R>>,
}

impl<R, E> ClassifierActor<R, E>
where
    E: EventTimeExtractor<R>,
{
    async fn run(mut self) {
        while let Some(message) = self.receiver.recv().await {
            self.handle_message(message);
        }
        info!(
            partition = self.classifier.partition(),
            stats = ?self.classifier.stats(),
            "Classifier actor stopped"
        );
    }

    // the caller may have gone away, a dropped response is fine
    fn handle_message(&mut self, message: ActorMessage<R>) {
        match message {
            ActorMessage::Classify { record, respond_to } => {
                let _ = respond_to.send(self.classifier.classify(record));
            }
            ActorMessage::Snapshot { respond_to } => {
                let _ = respond_to.send(self.classifier.snapshot());
            }
            ActorMessage::Restore { blob, respond_to } => {
                let _ = respond_to.send(self.classifier.restore(&blob));
            }
            ActorMessage::Stats { respond_to } => {
                let _ = respond_to.send(self.classifier.stats());
            }
            ActorMessage::CurrentHwm { respond_to } => {
                let _ = respond_to.send(self.classifier.current_hwm());
            }
        }
    }
}

/// Handle to a classifier running in its own task. The task stops once every handle is dropped.
pub struct ClassifierHandle<R> {
    sender: mpsc::Sender<ActorMessage<R>>,
}

impl<R> Clone for ClassifierHandle<R> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<R> ClassifierHandle<R>
where
    R: Send + 'static,
{
    /// Spawns the classifier. `capacity` bounds the number of queued requests.
    pub fn new<E>(classifier: Classifier<R, E>, capacity: usize) -> (Self, JoinHandle<()>)
    where
        E: EventTimeExtractor<R> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(capacity);
        let actor = ClassifierActor {
            classifier,
            receiver,
        };
        let handle = tokio::spawn(actor.run());
        (Self { sender }, handle)
    }

    pub async fn classify(&self, record: R) -> Result<Outcome<R>> {
        let (respond_to, rx) = oneshot::channel();
        self.send(ActorMessage::Classify { record, respond_to })
            .await?;
        rx.await
            .map_err(|e| Error::ActorPatternRecv(e.to_string()))
    }

    pub async fn snapshot(&self) -> Result<WatermarkStateBlob> {
        let (respond_to, rx) = oneshot::channel();
        self.send(ActorMessage::Snapshot { respond_to }).await?;
        rx.await
            .map_err(|e| Error::ActorPatternRecv(e.to_string()))
    }

    pub async fn restore(&self, blob: WatermarkStateBlob) -> Result<()> {
        let (respond_to, rx) = oneshot::channel();
        self.send(ActorMessage::Restore { blob, respond_to })
            .await?;
        rx.await
            .map_err(|e| Error::ActorPatternRecv(e.to_string()))?
    }

    pub async fn stats(&self) -> Result<ClassifierStats> {
        let (respond_to, rx) = oneshot::channel();
        self.send(ActorMessage::Stats { respond_to }).await?;
        rx.await
            .map_err(|e| Error::ActorPatternRecv(e.to_string()))
    }

    pub async fn current_hwm(&self) -> Result<Option<Timestamp>> {
        let (respond_to, rx) = oneshot::channel();
        self.send(ActorMessage::CurrentHwm { respond_to }).await?;
        rx.await
            .map_err(|e| Error::ActorPatternRecv(e.to_string()))
    }

    async fn send(&self, message: ActorMessage<R>) -> Result<()> {
        self.sender
            .send(message)
            .await
            .map_err(|_| Error::Actor("classifier task is not running".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::classifier::Classification;
    use crate::classifier::test_utils::{at, identity};
    use crate::config::{ClassifierConfig, EarlyPolicyConfig};
    use crate::error::EventTimeError;

    type Extract = fn(&Timestamp) -> std::result::Result<Timestamp, EventTimeError>;

    fn classifier() -> Classifier<Timestamp, Extract> {
        let config = ClassifierConfig::new(
            TimeDelta::minutes(5),
            EarlyPolicyConfig::WatermarkBound {
                tolerance: TimeDelta::hours(1),
            },
        );
        Classifier::new(config, identity as Extract).unwrap()
    }

    #[tokio::test]
    async fn test_classify_through_handle() {
        let (handle, task) = ClassifierHandle::new(classifier(), 10);

        let mut labels = vec![];
        for t in [at(10, 0), at(10, 3), at(9, 50), at(10, 10)] {
            labels.push(handle.classify(t).await.unwrap().unwrap().classification);
        }
        assert_eq!(
            labels,
            vec![
                Classification::OnTime,
                Classification::OnTime,
                Classification::Late,
                Classification::OnTime
            ]
        );
        assert_eq!(handle.current_hwm().await.unwrap(), Some(at(10, 10)));
        assert_eq!(handle.stats().await.unwrap().late, 1);

        drop(handle);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_and_restore_through_handle() {
        let (first, first_task) = ClassifierHandle::new(classifier(), 10);
        first.classify(at(10, 0)).await.unwrap().unwrap();
        first.classify(at(10, 5)).await.unwrap().unwrap();
        let blob = first.snapshot().await.unwrap();

        let (second, second_task) = ClassifierHandle::new(classifier(), 10);
        second.restore(blob).await.unwrap();
        assert_eq!(second.current_hwm().await.unwrap(), Some(at(10, 5)));

        let late = second.classify(at(9, 59)).await.unwrap().unwrap();
        assert_eq!(late.classification, Classification::Late);

        let bad = second
            .restore(WatermarkStateBlob::from(vec![0xff]))
            .await;
        assert!(bad.is_err());
        assert_eq!(second.current_hwm().await.unwrap(), Some(at(10, 5)));

        drop(first);
        drop(second);
        first_task.await.unwrap();
        second_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_state() {
        let (handle, task) = ClassifierHandle::new(classifier(), 4);

        let mut joins = vec![];
        for m in 0..20 {
            let handle = handle.clone();
            joins.push(tokio::spawn(async move {
                handle
                    .classify(at(10, 0) + TimeDelta::seconds(m))
                    .await
                    .unwrap()
                    .unwrap()
            }));
        }
        for join in joins {
            join.await.unwrap();
        }

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.total(), 20);
        // all within lateness of each other, whatever the arrival order
        assert_eq!(stats.on_time, 20);
        assert_eq!(
            handle.current_hwm().await.unwrap(),
            Some(at(10, 0) + TimeDelta::seconds(19))
        );

        drop(handle);
        task.await.unwrap();
    }
}
