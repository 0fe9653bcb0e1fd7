//! Durable store for campaigns, jobs, senders and sent-email audit records.
//!
//! Two implementations:
//! - `InMemoryStore`: process-local, for dev/tests
//! - `PostgresStore`: SQLx-backed, schema in `migrations/`
//!
//! The job row is the source of truth for delivery state. Anything the queue
//! carries is only a reference to a row in this store.

mod in_memory;
mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use mailflow_campaigns::{
    Campaign, EmailJob, JobPatch, JobStats, JobView, JobWithCampaign, NewSender, NewSentEmail,
    NewUser, Sender, SentEmail, User,
};
use mailflow_core::{EmailJobId, SenderId, UserId};

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

/// Store operation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Persistence boundary used by scheduling, dispatch and the HTTP surface.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn create_campaign(&self, campaign: Campaign) -> Result<Campaign, StoreError>;

    /// Bulk insert. Either every row is written or none is.
    async fn create_jobs(&self, jobs: Vec<EmailJob>) -> Result<(), StoreError>;

    async fn find_job(&self, id: EmailJobId) -> Result<Option<EmailJob>, StoreError>;

    async fn find_job_with_campaign(
        &self,
        id: EmailJobId,
    ) -> Result<Option<JobWithCampaign>, StoreError>;

    async fn update_job(&self, id: EmailJobId, patch: JobPatch) -> Result<EmailJob, StoreError>;

    async fn delete_job(&self, id: EmailJobId) -> Result<(), StoreError>;

    async fn find_sender(&self, id: SenderId) -> Result<Option<Sender>, StoreError>;

    async fn create_sender(&self, sender: NewSender) -> Result<Sender, StoreError>;

    async fn list_senders(&self, user_id: UserId) -> Result<Vec<Sender>, StoreError>;

    async fn create_sent_email(&self, record: NewSentEmail) -> Result<SentEmail, StoreError>;

    /// Insert a user, or refresh profile fields of the user with the same email.
    async fn upsert_user(&self, user: NewUser) -> Result<User, StoreError>;

    async fn list_jobs(
        &self,
        user_id: UserId,
        view: JobView,
    ) -> Result<Vec<JobWithCampaign>, StoreError>;

    async fn job_stats(&self, user_id: UserId) -> Result<JobStats, StoreError>;
}

#[async_trait]
impl<S> CampaignStore for Arc<S>
where
    S: CampaignStore + ?Sized,
{
    async fn create_campaign(&self, campaign: Campaign) -> Result<Campaign, StoreError> {
        (**self).create_campaign(campaign).await
    }

    async fn create_jobs(&self, jobs: Vec<EmailJob>) -> Result<(), StoreError> {
        (**self).create_jobs(jobs).await
    }

    async fn find_job(&self, id: EmailJobId) -> Result<Option<EmailJob>, StoreError> {
        (**self).find_job(id).await
    }

    async fn find_job_with_campaign(
        &self,
        id: EmailJobId,
    ) -> Result<Option<JobWithCampaign>, StoreError> {
        (**self).find_job_with_campaign(id).await
    }

    async fn update_job(&self, id: EmailJobId, patch: JobPatch) -> Result<EmailJob, StoreError> {
        (**self).update_job(id, patch).await
    }

    async fn delete_job(&self, id: EmailJobId) -> Result<(), StoreError> {
        (**self).delete_job(id).await
    }

    async fn find_sender(&self, id: SenderId) -> Result<Option<Sender>, StoreError> {
        (**self).find_sender(id).await
    }

    async fn create_sender(&self, sender: NewSender) -> Result<Sender, StoreError> {
        (**self).create_sender(sender).await
    }

    async fn list_senders(&self, user_id: UserId) -> Result<Vec<Sender>, StoreError> {
        (**self).list_senders(user_id).await
    }

    async fn create_sent_email(&self, record: NewSentEmail) -> Result<SentEmail, StoreError> {
        (**self).create_sent_email(record).await
    }

    async fn upsert_user(&self, user: NewUser) -> Result<User, StoreError> {
        (**self).upsert_user(user).await
    }

    async fn list_jobs(
        &self,
        user_id: UserId,
        view: JobView,
    ) -> Result<Vec<JobWithCampaign>, StoreError> {
        (**self).list_jobs(user_id, view).await
    }

    async fn job_stats(&self, user_id: UserId) -> Result<JobStats, StoreError> {
        (**self).job_stats(user_id).await
    }
}
