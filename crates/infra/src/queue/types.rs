//! Core queue types and policies.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use mailflow_core::{EmailJobId, SenderId};

/// Broker queue name; also the Redis key prefix.
pub const QUEUE_NAME: &str = "email-queue";

/// Maximum jobs the broker consumer runs at once.
pub const BROKER_CONCURRENCY: usize = 5;

/// Why an envelope was enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvelopeKind {
    /// First delivery attempt at the job's scheduled time.
    SendEmail,
    /// Deferred to the next UTC hour by the sender quota.
    RetryRateLimit,
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::SendEmail => "send-email",
            EnvelopeKind::RetryRateLimit => "retry-rate-limit",
        }
    }
}

/// Ephemeral wake-up signal for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEnvelope {
    pub job_id: EmailJobId,
    pub sender_id: SenderId,
    pub delay: Duration,
    pub kind: EnvelopeKind,
}

impl QueueEnvelope {
    pub fn send(job_id: EmailJobId, sender_id: SenderId, delay: Duration) -> Self {
        Self {
            job_id,
            sender_id,
            delay,
            kind: EnvelopeKind::SendEmail,
        }
    }

    pub fn rate_limit_retry(job_id: EmailJobId, sender_id: SenderId, delay: Duration) -> Self {
        Self {
            job_id,
            sender_id,
            delay,
            kind: EnvelopeKind::RetryRateLimit,
        }
    }
}

/// Broker reachability as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connectivity {
    Up,
    #[default]
    Down,
}

impl Connectivity {
    pub fn is_up(&self) -> bool {
        matches!(self, Connectivity::Up)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Connectivity::Up => "up",
            Connectivity::Down => "down",
        }
    }
}

/// Which queue strategy handled an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Broker,
    Local,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Broker => "broker",
            Strategy::Local => "local",
        }
    }
}

/// Retry policy applied by the broker consumer. Backoff is exponential:
/// `base_delay * 2^(attempt-1)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::broker_default()
    }
}

impl RetryPolicy {
    /// 3 attempts, exponential backoff starting at 1 second.
    pub fn broker_default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }

    /// Delay before the next attempt once `attempts_made` attempts have failed.
    pub fn delay_for_attempt(&self, attempts_made: u32) -> Duration {
        if attempts_made == 0 {
            return Duration::ZERO;
        }

        let factor = 2u32.saturating_pow(attempts_made - 1);
        self.base_delay.saturating_mul(factor)
    }

    /// Check if another attempt is allowed after `attempts_made` failures.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

/// Broker consumer configuration.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// How often to look for due envelopes
    pub poll_interval: Duration,
    /// Maximum concurrent handler invocations
    pub max_concurrent: usize,
    pub retry: RetryPolicy,
    /// Name for logging
    pub name: String,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            max_concurrent: BROKER_CONCURRENCY,
            retry: RetryPolicy::broker_default(),
            name: "broker-consumer".to_string(),
        }
    }
}
