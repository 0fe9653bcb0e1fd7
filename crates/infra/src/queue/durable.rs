//! Consumer side of the durable queue.
//!
//! The consumer only talks to a `DurableQueue`; the Redis layout lives in
//! `broker.rs`. A claimed record is gone from the due set, so it is either
//! completed, rescheduled with backoff or buried. Nothing else removes it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use mailflow_core::{EmailJobId, SenderId};

use super::outcome::{JobOutcome, OutcomeSender};
use super::types::{ConsumerConfig, Connectivity, EnvelopeKind, QueueEnvelope, Strategy};
use super::{JobHandler, QueueError};
use crate::workers::WorkerHandle;

/// Persisted form of an envelope while it sits in the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerRecord {
    pub id: Uuid,
    pub name: EnvelopeKind,
    pub job_id: EmailJobId,
    pub sender_id: SenderId,
    pub attempts_made: u32,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
}

impl BrokerRecord {
    pub fn new(envelope: &QueueEnvelope, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: envelope.kind,
            job_id: envelope.job_id,
            sender_id: envelope.sender_id,
            attempts_made: 0,
            enqueued_at,
            failed_reason: None,
        }
    }

    fn envelope(&self) -> QueueEnvelope {
        QueueEnvelope {
            job_id: self.job_id,
            sender_id: self.sender_id,
            delay: Duration::ZERO,
            kind: self.name,
        }
    }
}

/// Storage operations the broker consumer needs.
#[async_trait]
pub trait DurableQueue: Send + Sync {
    /// Store `record` and make it due after `delay`.
    async fn schedule(&self, record: &BrokerRecord, delay: Duration) -> Result<(), QueueError>;

    /// Take up to `limit` due records out of the due set in one step. On error
    /// nothing has been taken.
    async fn claim_due(&self, limit: usize) -> Result<Vec<BrokerRecord>, QueueError>;

    /// Drop a record whose handler succeeded.
    async fn complete(&self, record: &BrokerRecord) -> Result<(), QueueError>;

    /// Move a record that exhausted its attempts to the failed list.
    async fn bury(&self, record: &BrokerRecord) -> Result<(), QueueError>;
}

/// Pulls due records and runs them with bounded concurrency.
#[derive(Debug)]
pub struct BrokerConsumer;

impl BrokerConsumer {
    pub fn spawn(
        queue: Arc<dyn DurableQueue>,
        handler: Arc<dyn JobHandler>,
        outcomes: OutcomeSender,
        mut connectivity: watch::Receiver<Connectivity>,
        config: ConsumerConfig,
    ) -> WorkerHandle {
        WorkerHandle::spawn("broker-consumer", move |shutdown| async move {
            info!(consumer = %config.name, concurrency = config.max_concurrent, "broker consumer started");
            let permits = Arc::new(Semaphore::new(config.max_concurrent));

            loop {
                if !connectivity.borrow_and_update().is_up() {
                    tokio::select! {
                        _ = shutdown.notified() => break,
                        changed = connectivity.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            continue;
                        }
                    }
                }

                let free = permits.available_permits();
                let claimed = if free == 0 {
                    Vec::new()
                } else {
                    match queue.claim_due(free).await {
                        Ok(claimed) => claimed,
                        Err(err) => {
                            debug!(consumer = %config.name, error = %err, "claim failed");
                            Vec::new()
                        }
                    }
                };

                let idle = claimed.is_empty();
                for record in claimed {
                    let permit = match permits.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };
                    let queue = queue.clone();
                    let handler = handler.clone();
                    let outcomes = outcomes.clone();
                    let config = config.clone();
                    tokio::spawn(async move {
                        run_claimed(queue.as_ref(), handler.as_ref(), &outcomes, &config, record)
                            .await;
                        drop(permit);
                    });
                }

                if idle {
                    tokio::select! {
                        _ = shutdown.notified() => break,
                        _ = tokio::time::sleep(config.poll_interval) => {}
                    }
                }
            }
            info!(consumer = %config.name, "broker consumer stopped");
        })
    }
}

async fn run_claimed(
    queue: &dyn DurableQueue,
    handler: &dyn JobHandler,
    outcomes: &OutcomeSender,
    config: &ConsumerConfig,
    mut record: BrokerRecord,
) {
    let envelope = record.envelope();

    let outcome = match handler.handle(&envelope).await {
        Ok(result) => {
            if let Err(err) = queue.complete(&record).await {
                warn!(job_id = %record.job_id, error = %err, "failed to remove completed broker entry");
            }
            JobOutcome::Completed {
                envelope,
                strategy: Strategy::Broker,
                result,
            }
        }
        Err(err) => {
            record.attempts_made += 1;
            let attempt = record.attempts_made;
            let will_retry = config.retry.should_retry(attempt);

            let requeued = if will_retry {
                let delay = config.retry.delay_for_attempt(attempt);
                queue.schedule(&record, delay).await
            } else {
                record.failed_reason = Some(err.to_string());
                queue.bury(&record).await
            };
            if let Err(e) = requeued {
                warn!(job_id = %record.job_id, error = %e, "failed to record broker retry state");
            }

            JobOutcome::Failed {
                envelope,
                strategy: Strategy::Broker,
                error: err.to_string(),
                attempt,
                will_retry,
            }
        }
    };

    let _ = outcomes.send(outcome);
}
