//! Dispatch worker: turns a fired envelope into at most one delivery.
//!
//! Per firing:
//! 1. load the job; missing or already SENT is a no-op
//! 2. load the sender; missing is an error and nothing is mutated
//! 3. check the hourly quota; when exhausted, re-enqueue for the next UTC hour
//!    and leave the job PENDING
//! 4. send; on success mark SENT, write the audit record and count the send;
//!    on transport failure mark FAILED and return the error

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use mailflow_campaigns::{HourWindow, JobPatch, NewSentEmail};
use mailflow_core::{Clock, EmailJobId, SenderId};

use crate::mail::{MailTransport, OutgoingMail, TransportError};
use crate::queue::{JobHandler, JobQueue, QueueEnvelope, QueueError};
use crate::rate_limit::{RateLimitError, RateLimiter};
use crate::store::{CampaignStore, StoreError};

/// Why a firing did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The job row no longer exists.
    JobMissing,
    /// The job was already delivered by an earlier firing.
    AlreadySent,
    /// Another firing for the same job is running in this process.
    InFlight,
}

/// Result of one successful handler invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchOutcome {
    #[serde(rename = "SUCCESS")]
    Sent,
    RateLimited { next_try: DateTime<Utc> },
    Skipped { reason: SkipReason },
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Sent => "SUCCESS",
            DispatchOutcome::RateLimited { .. } => "RATE_LIMITED",
            DispatchOutcome::Skipped { .. } => "SKIPPED",
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("sender not found: {0}")]
    SenderNotFound(SenderId),

    #[error("delivery failed: {0}")]
    Transport(#[source] TransportError),

    /// Delivery failed and the FAILED status could not be written either.
    #[error("delivery failed ({delivery}); marking the job failed also failed: {store}")]
    FailureNotRecorded {
        delivery: TransportError,
        #[source]
        store: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    #[error("failed to re-enqueue rate limited job: {0}")]
    Requeue(#[from] QueueError),
}

/// Processes fired envelopes against the store, limiter and transport.
pub struct DispatchWorker {
    store: Arc<dyn CampaignStore>,
    limiter: Arc<dyn RateLimiter>,
    transport: Arc<dyn MailTransport>,
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
    in_flight: Mutex<HashSet<EmailJobId>>,
}

impl core::fmt::Debug for DispatchWorker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DispatchWorker")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl DispatchWorker {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        limiter: Arc<dyn RateLimiter>,
        transport: Arc<dyn MailTransport>,
        queue: Arc<dyn JobQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            limiter,
            transport,
            queue,
            clock,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    #[instrument(skip(self), err)]
    pub async fn process(
        &self,
        job_id: EmailJobId,
        sender_id: SenderId,
    ) -> Result<DispatchOutcome, DispatchError> {
        let Some(_guard) = InFlightGuard::claim(&self.in_flight, job_id) else {
            debug!(%job_id, "job already being processed; skipping");
            return Ok(DispatchOutcome::Skipped {
                reason: SkipReason::InFlight,
            });
        };

        let Some(row) = self.store.find_job_with_campaign(job_id).await? else {
            debug!(%job_id, "job no longer exists; skipping");
            return Ok(DispatchOutcome::Skipped {
                reason: SkipReason::JobMissing,
            });
        };
        if row.job.is_sent() {
            debug!(%job_id, "job already sent; skipping");
            return Ok(DispatchOutcome::Skipped {
                reason: SkipReason::AlreadySent,
            });
        }

        let Some(sender) = self.store.find_sender(sender_id).await? else {
            warn!(%job_id, %sender_id, "sender missing; job left pending");
            return Err(DispatchError::SenderNotFound(sender_id));
        };

        if !self.limiter.can_send(sender_id, sender.hourly_limit).await? {
            let now = self.clock.now();
            let next_try = HourWindow::containing(now).next_boundary();
            let delay = HourWindow::delay_until_next(now);
            self.queue
                .enqueue(QueueEnvelope::rate_limit_retry(job_id, sender_id, delay))
                .await?;
            info!(
                %job_id,
                %sender_id,
                limit = sender.hourly_limit,
                delay_ms = delay.as_millis() as u64,
                "hourly limit reached; deferred to next hour"
            );
            return Ok(DispatchOutcome::RateLimited { next_try });
        }

        let mail = OutgoingMail {
            to: row.job.recipient.clone(),
            subject: row.campaign.subject.clone(),
            html_body: row.campaign.body.clone(),
        };

        match self.transport.send(&sender.credentials(), &mail).await {
            Ok(delivery) => {
                self.store
                    .update_job(job_id, JobPatch::sent(self.clock.now()))
                    .await?;
                self.store
                    .create_sent_email(NewSentEmail {
                        sender_id,
                        recipient: mail.to,
                        subject: mail.subject,
                    })
                    .await?;
                self.limiter.increment(sender_id).await?;
                info!(%job_id, %sender_id, message_id = %delivery.message_id, "email sent");
                Ok(DispatchOutcome::Sent)
            }
            Err(err) => {
                warn!(%job_id, %sender_id, error = %err, "delivery failed");
                match self
                    .store
                    .update_job(job_id, JobPatch::failed(err.to_string()))
                    .await
                {
                    Ok(_) => Err(DispatchError::Transport(err)),
                    Err(store) => Err(DispatchError::FailureNotRecorded {
                        delivery: err,
                        store,
                    }),
                }
            }
        }
    }
}

#[async_trait]
impl JobHandler for DispatchWorker {
    async fn handle(&self, envelope: &QueueEnvelope) -> Result<DispatchOutcome, DispatchError> {
        self.process(envelope.job_id, envelope.sender_id).await
    }
}

/// Marks a job as running in this process until dropped.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<EmailJobId>>,
    job_id: EmailJobId,
}

impl<'a> InFlightGuard<'a> {
    fn claim(set: &'a Mutex<HashSet<EmailJobId>>, job_id: EmailJobId) -> Option<Self> {
        let mut running = set.lock().unwrap_or_else(|p| p.into_inner());
        running
            .insert(job_id)
            .then_some(Self { set, job_id })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut running = self.set.lock().unwrap_or_else(|p| p.into_inner());
        running.remove(&self.job_id);
    }
}
