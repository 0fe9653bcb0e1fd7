//! Completion notifications for observability.
//!
//! Outcomes carry no retry obligation: whether a job is re-enqueued is decided
//! by the handler (rate limiting) or the broker consumer (retry policy).

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::types::{QueueEnvelope, Strategy};
use crate::workers::DispatchOutcome;

pub type OutcomeSender = mpsc::UnboundedSender<JobOutcome>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed {
        envelope: QueueEnvelope,
        strategy: Strategy,
        result: DispatchOutcome,
    },
    Failed {
        envelope: QueueEnvelope,
        strategy: Strategy,
        error: String,
        /// 1-based attempt that failed.
        attempt: u32,
        will_retry: bool,
    },
}

/// Drain outcomes into the log until every sender is dropped.
pub fn spawn_outcome_logger(mut rx: mpsc::UnboundedReceiver<JobOutcome>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(outcome) = rx.recv().await {
            log_outcome(&outcome);
        }
    })
}

fn log_outcome(outcome: &JobOutcome) {
    match outcome {
        JobOutcome::Completed {
            envelope,
            strategy,
            result,
        } => info!(
            job_id = %envelope.job_id,
            sender_id = %envelope.sender_id,
            strategy = strategy.as_str(),
            result = result.as_str(),
            "job completed"
        ),
        JobOutcome::Failed {
            envelope,
            strategy,
            error,
            attempt,
            will_retry: true,
        } => warn!(
            job_id = %envelope.job_id,
            strategy = strategy.as_str(),
            attempt,
            error = %error,
            "job failed; broker will retry"
        ),
        JobOutcome::Failed {
            envelope,
            strategy,
            error,
            attempt,
            will_retry: false,
        } => error!(
            job_id = %envelope.job_id,
            strategy = strategy.as_str(),
            attempt,
            error = %error,
            "job failed"
        ),
    }
}
