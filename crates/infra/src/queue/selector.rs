use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::types::{Connectivity, QueueEnvelope, Strategy};
use super::{JobQueue, QueueError};
use crate::workers::WorkerHandle;

/// Strategy holder: routes each new envelope to the broker while it is up and
/// to the local queue otherwise.
///
/// Switching only affects envelopes enqueued afterwards. Timers already armed
/// in the local queue keep running there.
pub struct QueueSelector {
    local: Arc<dyn JobQueue>,
    durable: Option<Arc<dyn JobQueue>>,
    snapshot: RwLock<Connectivity>,
}

impl core::fmt::Debug for QueueSelector {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QueueSelector")
            .field("has_durable", &self.durable.is_some())
            .field("active", &self.active())
            .finish()
    }
}

impl QueueSelector {
    pub fn new(local: Arc<dyn JobQueue>, durable: Option<Arc<dyn JobQueue>>) -> Self {
        Self {
            local,
            durable,
            snapshot: RwLock::new(Connectivity::Down),
        }
    }

    /// Local-only selector (no broker configured).
    pub fn local_only(local: Arc<dyn JobQueue>) -> Self {
        Self::new(local, None)
    }

    pub fn apply(&self, connectivity: Connectivity) {
        let mut snapshot = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        if *snapshot != connectivity {
            *snapshot = connectivity;
            info!(
                connectivity = connectivity.as_str(),
                strategy = self.strategy_for(connectivity).as_str(),
                "queue strategy switched"
            );
        }
    }

    pub fn connectivity(&self) -> Connectivity {
        *self.snapshot.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn active(&self) -> Strategy {
        self.strategy_for(self.connectivity())
    }

    fn strategy_for(&self, connectivity: Connectivity) -> Strategy {
        match (&self.durable, connectivity) {
            (Some(_), Connectivity::Up) => Strategy::Broker,
            _ => Strategy::Local,
        }
    }

    /// Keep the snapshot in step with a connectivity subscription.
    pub fn follow(self: &Arc<Self>, mut updates: watch::Receiver<Connectivity>) -> WorkerHandle {
        let selector = self.clone();
        WorkerHandle::spawn("queue-selector", move |shutdown| async move {
            selector.apply(*updates.borrow_and_update());
            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    changed = updates.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let connectivity = *updates.borrow_and_update();
                        selector.apply(connectivity);
                    }
                }
            }
        })
    }
}

#[async_trait]
impl JobQueue for QueueSelector {
    async fn enqueue(&self, envelope: QueueEnvelope) -> Result<(), QueueError> {
        let durable = match (self.active(), &self.durable) {
            (Strategy::Broker, Some(durable)) => durable,
            _ => return self.local.enqueue(envelope).await,
        };

        match durable.enqueue(envelope.clone()).await {
            Ok(()) => {
                debug!(job_id = %envelope.job_id, "enqueued on broker");
                Ok(())
            }
            Err(err) => {
                warn!(
                    job_id = %envelope.job_id,
                    error = %err,
                    "broker enqueue failed; scheduling locally"
                );
                self.local.enqueue(envelope).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use mailflow_core::{EmailJobId, SenderId};

    #[derive(Debug, Default)]
    struct Recording {
        seen: Mutex<Vec<QueueEnvelope>>,
        fail: bool,
    }

    #[async_trait]
    impl JobQueue for Recording {
        async fn enqueue(&self, envelope: QueueEnvelope) -> Result<(), QueueError> {
            if self.fail {
                return Err(QueueError::Unavailable("broken pipe".to_string()));
            }
            self.seen.lock().unwrap().push(envelope);
            Ok(())
        }
    }

    fn envelope() -> QueueEnvelope {
        QueueEnvelope::send(EmailJobId::new(), SenderId::new(), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn routes_by_connectivity() {
        let local = Arc::new(Recording::default());
        let broker = Arc::new(Recording::default());
        let selector = QueueSelector::new(local.clone(), Some(broker.clone() as Arc<dyn JobQueue>));

        selector.enqueue(envelope()).await.unwrap();
        selector.apply(Connectivity::Up);
        selector.enqueue(envelope()).await.unwrap();
        selector.apply(Connectivity::Down);
        selector.enqueue(envelope()).await.unwrap();

        assert_eq!(local.seen.lock().unwrap().len(), 2);
        assert_eq!(broker.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn broker_failure_falls_back_to_local() {
        let local = Arc::new(Recording::default());
        let broker = Arc::new(Recording {
            fail: true,
            ..Recording::default()
        });
        let selector = QueueSelector::new(local.clone(), Some(broker as Arc<dyn JobQueue>));
        selector.apply(Connectivity::Up);

        let env = envelope();
        selector.enqueue(env.clone()).await.unwrap();

        assert_eq!(local.seen.lock().unwrap().as_slice(), &[env]);
    }

    #[tokio::test]
    async fn without_broker_connectivity_is_ignored() {
        let local = Arc::new(Recording::default());
        let selector = QueueSelector::local_only(local.clone());
        selector.apply(Connectivity::Up);

        assert_eq!(selector.active(), Strategy::Local);
        selector.enqueue(envelope()).await.unwrap();
        assert_eq!(local.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn follows_subscription() {
        let local = Arc::new(Recording::default());
        let broker = Arc::new(Recording::default());
        let selector = Arc::new(QueueSelector::new(local, Some(broker as Arc<dyn JobQueue>)));
        let (tx, rx) = watch::channel(Connectivity::Down);

        let handle = selector.follow(rx);
        tx.send(Connectivity::Up).unwrap();

        for _ in 0..50 {
            if selector.active() == Strategy::Broker {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(selector.active(), Strategy::Broker);
        handle.shutdown().await;
    }
}
