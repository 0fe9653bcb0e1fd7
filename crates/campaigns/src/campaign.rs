use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use mailflow_core::{CampaignId, DomainError, DomainResult, SenderId, UserId};

use crate::job::EmailJob;

/// A named bulk-send request. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: CampaignId,
    pub user_id: UserId,
    pub sender_id: SenderId,
    pub name: String,
    pub subject: String,
    pub body: String,
    pub start_time: DateTime<Utc>,
    /// Gap between consecutive recipients, in seconds.
    pub delay: u64,
    pub created_at: DateTime<Utc>,
}

/// Input to campaign scheduling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignSpec {
    pub name: String,
    pub subject: String,
    pub body: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub delay: u64,
    pub recipients: Vec<String>,
    pub sender_id: SenderId,
}

/// One job produced by expanding a campaign, with the delay to hand to the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedJob {
    pub job: EmailJob,
    pub enqueue_delay: StdDuration,
}

/// The rows a campaign expands into, ready to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignPlan {
    pub campaign: Campaign,
    pub jobs: Vec<PlannedJob>,
}

impl CampaignSpec {
    pub fn validate(&self) -> DomainResult<()> {
        if self.recipients.is_empty() {
            return Err(DomainError::validation("recipients must not be empty"));
        }
        if let Some(idx) = self.recipients.iter().position(|r| r.trim().is_empty()) {
            return Err(DomainError::validation(format!(
                "recipient at index {idx} is blank"
            )));
        }
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("name is required"));
        }
        if self.subject.trim().is_empty() {
            return Err(DomainError::validation("subject is required"));
        }
        Ok(())
    }

    /// `start_time + index * delay`.
    pub fn scheduled_time(&self, index: usize) -> DomainResult<DateTime<Utc>> {
        let offset = i64::try_from(index)
            .ok()
            .zip(i64::try_from(self.delay).ok())
            .and_then(|(i, d)| i.checked_mul(d))
            .and_then(Duration::try_seconds)
            .ok_or_else(|| DomainError::validation("delay * recipients overflows"))?;

        self.start_time
            .checked_add_signed(offset)
            .ok_or_else(|| DomainError::validation("scheduled time out of range"))
    }

    /// Validate and expand into a campaign row plus one PENDING job per recipient.
    ///
    /// Recipients keep their order; job `i` is scheduled at `start_time + i * delay`.
    /// Jobs already due get a zero enqueue delay.
    pub fn plan(self, user_id: UserId, now: DateTime<Utc>) -> DomainResult<CampaignPlan> {
        self.validate()?;

        let campaign = Campaign {
            id: CampaignId::new(),
            user_id,
            sender_id: self.sender_id,
            name: self.name.clone(),
            subject: self.subject.clone(),
            body: self.body.clone(),
            start_time: self.start_time,
            delay: self.delay,
            created_at: now,
        };

        let mut jobs = Vec::with_capacity(self.recipients.len());
        for (idx, recipient) in self.recipients.iter().enumerate() {
            let scheduled_time = self.scheduled_time(idx)?;
            let enqueue_delay = (scheduled_time - now).to_std().unwrap_or(StdDuration::ZERO);
            jobs.push(PlannedJob {
                job: EmailJob::pending(campaign.id, recipient.trim(), scheduled_time, now),
                enqueue_delay,
            });
        }

        Ok(CampaignPlan { campaign, jobs })
    }
}
