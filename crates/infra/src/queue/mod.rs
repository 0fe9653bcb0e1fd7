//! Delayed job queue with automatic failover between a durable broker and an
//! in-process timer queue.
//!
//! ## Components
//!
//! - `QueueEnvelope`: wake-up signal referencing a job row (never the source of truth)
//! - `JobQueue`: "run this envelope after a delay" capability
//! - `LocalQueue` + `LocalConsumer`: tokio timers, no persistence, no retry
//! - `DurableQueue` + `BrokerConsumer`: durable due set consumed with 3
//!   attempts, exponential backoff and bounded concurrency
//! - `BrokerQueue` (feature `redis`): the Redis `DurableQueue`
//! - `ConnectivitySupervisor`: owns broker up/down state and publishes transitions
//! - `QueueSelector`: routes new envelopes to whichever strategy is active
//! - `JobOutcome` + `spawn_outcome_logger`: completed/failed notifications

#[cfg(feature = "redis")]
mod broker;
mod durable;
mod local;
mod outcome;
mod selector;
mod supervisor;
mod types;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::workers::{DispatchError, DispatchOutcome};

#[cfg(feature = "redis")]
pub use broker::BrokerQueue;
pub use durable::{BrokerConsumer, BrokerRecord, DurableQueue};
pub use local::{LocalConsumer, LocalFirings, LocalQueue};
pub use outcome::{JobOutcome, OutcomeSender, spawn_outcome_logger};
pub use selector::QueueSelector;
pub use supervisor::{BrokerProbe, ConnectivitySupervisor, SupervisorConfig};
pub use types::{
    BROKER_CONCURRENCY, ConsumerConfig, Connectivity, EnvelopeKind, QUEUE_NAME,
    QueueEnvelope, RetryPolicy, Strategy,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The broker could not be reached.
    #[error("queue backend unavailable: {0}")]
    Unavailable(String),

    /// The consumer side is gone (process shutting down).
    #[error("queue closed")]
    Closed,

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Schedule an envelope to fire after its delay.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, envelope: QueueEnvelope) -> Result<(), QueueError>;
}

#[async_trait]
impl<Q> JobQueue for Arc<Q>
where
    Q: JobQueue + ?Sized,
{
    async fn enqueue(&self, envelope: QueueEnvelope) -> Result<(), QueueError> {
        (**self).enqueue(envelope).await
    }
}

/// Work run when an envelope fires. Must be idempotent: either strategy may
/// deliver the same envelope more than once.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, envelope: &QueueEnvelope) -> Result<DispatchOutcome, DispatchError>;
}

#[async_trait]
impl<H> JobHandler for Arc<H>
where
    H: JobHandler + ?Sized,
{
    async fn handle(&self, envelope: &QueueEnvelope) -> Result<DispatchOutcome, DispatchError> {
        (**self).handle(envelope).await
    }
}
