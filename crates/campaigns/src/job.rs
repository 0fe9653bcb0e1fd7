use std::cmp::Reverse;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mailflow_core::{CampaignId, EmailJobId};

use crate::campaign::Campaign;

/// Delivery status of a single job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Sent,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Sent => "SENT",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(JobStatus::Pending),
            "SENT" => Some(JobStatus::Sent),
            "FAILED" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scheduled single-recipient send derived from a campaign.
///
/// The job row is the durable source of truth for delivery state; queue
/// envelopes only reference it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailJob {
    pub id: EmailJobId,
    pub campaign_id: CampaignId,
    pub recipient: String,
    pub scheduled_time: DateTime<Utc>,
    pub status: JobStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub is_starred: bool,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmailJob {
    pub fn pending(
        campaign_id: CampaignId,
        recipient: impl Into<String>,
        scheduled_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EmailJobId::new(),
            campaign_id,
            recipient: recipient.into(),
            scheduled_time,
            status: JobStatus::Pending,
            sent_at: None,
            error: None,
            is_starred: false,
            is_archived: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_sent(&self) -> bool {
        self.status == JobStatus::Sent
    }

    /// Apply a partial update. Only fields present in the patch change.
    pub fn apply(&mut self, patch: &JobPatch, now: DateTime<Utc>) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(sent_at) = patch.sent_at {
            self.sent_at = Some(sent_at);
        }
        if let Some(error) = &patch.error {
            self.error = Some(error.clone());
        }
        if let Some(starred) = patch.is_starred {
            self.is_starred = starred;
        }
        if let Some(archived) = patch.is_archived {
            self.is_archived = archived;
        }
        self.updated_at = now;
    }
}

/// Partial update of a job row.
///
/// Dispatch only ever writes `sent` or `failed` patches; the UI flags
/// (`is_starred`/`is_archived`) belong to the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPatch {
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default, skip_deserializing)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_deserializing)]
    pub error: Option<String>,
    #[serde(default)]
    pub is_starred: Option<bool>,
    #[serde(default)]
    pub is_archived: Option<bool>,
}

impl JobPatch {
    pub fn sent(at: DateTime<Utc>) -> Self {
        Self {
            status: Some(JobStatus::Sent),
            sent_at: Some(at),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// A job joined with its owning campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobWithCampaign {
    #[serde(flatten)]
    pub job: EmailJob,
    pub campaign: Campaign,
}

/// Listing filters offered to the mailbox views.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum JobView {
    /// Pending, not archived, soonest first.
    Scheduled,
    /// Sent, not archived, most recent first.
    Sent,
    /// Archived, most recently touched first.
    Archived,
    /// Everything not archived, most recently touched first.
    All,
}

impl JobView {
    pub fn matches(&self, job: &EmailJob) -> bool {
        match self {
            JobView::Scheduled => job.status == JobStatus::Pending && !job.is_archived,
            JobView::Sent => job.status == JobStatus::Sent && !job.is_archived,
            JobView::Archived => job.is_archived,
            JobView::All => !job.is_archived,
        }
    }

    pub fn sort(&self, rows: &mut [JobWithCampaign]) {
        match self {
            JobView::Scheduled => rows.sort_by_key(|r| r.job.scheduled_time),
            JobView::Sent => rows.sort_by_key(|r| Reverse(r.job.sent_at)),
            JobView::Archived | JobView::All => rows.sort_by_key(|r| Reverse(r.job.updated_at)),
        }
    }
}

/// Mailbox counters for one user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub scheduled: u64,
    pub sent: u64,
    pub archived: u64,
}

impl JobStats {
    pub fn count(&mut self, job: &EmailJob) {
        if JobView::Scheduled.matches(job) {
            self.scheduled += 1;
        }
        if JobView::Sent.matches(job) {
            self.sent += 1;
        }
        if JobView::Archived.matches(job) {
            self.archived += 1;
        }
    }
}
