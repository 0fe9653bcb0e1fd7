use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use mailflow_campaigns::{
    Campaign, EmailJob, JobPatch, JobStats, JobView, JobWithCampaign, NewSender, NewSentEmail,
    NewUser, Sender, SentEmail, User,
};
use mailflow_core::{
    CampaignId, Clock, EmailJobId, SenderId, SentEmailId, SystemClock, UserId,
};

use super::{CampaignStore, StoreError};

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, User>,
    senders: HashMap<SenderId, Sender>,
    campaigns: HashMap<CampaignId, Campaign>,
    jobs: HashMap<EmailJobId, EmailJob>,
    sent_emails: Vec<SentEmail>,
}

impl Tables {
    fn joined(&self, job: &EmailJob) -> Option<JobWithCampaign> {
        self.campaigns.get(&job.campaign_id).map(|c| JobWithCampaign {
            job: job.clone(),
            campaign: c.clone(),
        })
    }

    fn jobs_of(&self, user_id: UserId) -> impl Iterator<Item = &EmailJob> {
        self.jobs.values().filter(move |j| {
            self.campaigns
                .get(&j.campaign_id)
                .is_some_and(|c| c.user_id == user_id)
        })
    }
}

/// In-memory store.
///
/// Intended for tests/dev and for running without a database. Every write
/// takes a single lock, so bulk inserts are atomic.
#[derive(Debug)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            clock,
        }
    }

    /// Every audit record written so far, oldest first.
    pub fn sent_emails(&self) -> Vec<SentEmail> {
        self.read()
            .map(|t| t.sent_emails.clone())
            .unwrap_or_default()
    }

    /// Number of job rows currently stored.
    pub fn job_count(&self) -> usize {
        self.read().map(|t| t.jobs.len()).unwrap_or_default()
    }

    /// Register a sender with a fixed id (fixtures).
    pub fn insert_sender(&self, sender: Sender) -> Result<(), StoreError> {
        self.write()?.senders.insert(sender.id, sender);
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))
    }
}

#[async_trait]
impl CampaignStore for InMemoryStore {
    async fn create_campaign(&self, campaign: Campaign) -> Result<Campaign, StoreError> {
        let mut tables = self.write()?;
        if tables.campaigns.contains_key(&campaign.id) {
            return Err(StoreError::Conflict(format!(
                "campaign already exists: {}",
                campaign.id
            )));
        }
        tables.campaigns.insert(campaign.id, campaign.clone());
        Ok(campaign)
    }

    async fn create_jobs(&self, jobs: Vec<EmailJob>) -> Result<(), StoreError> {
        let mut tables = self.write()?;

        // Validate the whole batch before touching the table.
        for job in &jobs {
            if !tables.campaigns.contains_key(&job.campaign_id) {
                return Err(StoreError::Conflict(format!(
                    "job {} references unknown campaign {}",
                    job.id, job.campaign_id
                )));
            }
            if tables.jobs.contains_key(&job.id) {
                return Err(StoreError::Conflict(format!("job already exists: {}", job.id)));
            }
        }

        for job in jobs {
            tables.jobs.insert(job.id, job);
        }
        Ok(())
    }

    async fn find_job(&self, id: EmailJobId) -> Result<Option<EmailJob>, StoreError> {
        Ok(self.read()?.jobs.get(&id).cloned())
    }

    async fn find_job_with_campaign(
        &self,
        id: EmailJobId,
    ) -> Result<Option<JobWithCampaign>, StoreError> {
        let tables = self.read()?;
        Ok(tables.jobs.get(&id).and_then(|j| tables.joined(j)))
    }

    async fn update_job(&self, id: EmailJobId, patch: JobPatch) -> Result<EmailJob, StoreError> {
        let now = self.clock.now();
        let mut tables = self.write()?;
        let job = tables
            .jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("job", id))?;
        job.apply(&patch, now);
        Ok(job.clone())
    }

    async fn delete_job(&self, id: EmailJobId) -> Result<(), StoreError> {
        self.write()?
            .jobs
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("job", id))
    }

    async fn find_sender(&self, id: SenderId) -> Result<Option<Sender>, StoreError> {
        Ok(self.read()?.senders.get(&id).cloned())
    }

    async fn create_sender(&self, sender: NewSender) -> Result<Sender, StoreError> {
        let sender = Sender {
            id: SenderId::new(),
            user_id: sender.user_id,
            email: sender.email,
            host: sender.host,
            port: sender.port,
            auth_user: sender.auth_user,
            auth_pass: sender.auth_pass,
            hourly_limit: sender.hourly_limit,
            created_at: self.clock.now(),
        };
        self.write()?.senders.insert(sender.id, sender.clone());
        Ok(sender)
    }

    async fn list_senders(&self, user_id: UserId) -> Result<Vec<Sender>, StoreError> {
        let mut senders: Vec<Sender> = self
            .read()?
            .senders
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        senders.sort_by_key(|s| s.created_at);
        Ok(senders)
    }

    async fn create_sent_email(&self, record: NewSentEmail) -> Result<SentEmail, StoreError> {
        let sent = SentEmail {
            id: SentEmailId::new(),
            sender_id: record.sender_id,
            recipient: record.recipient,
            subject: record.subject,
            sent_at: self.clock.now(),
        };
        self.write()?.sent_emails.push(sent.clone());
        Ok(sent)
    }

    async fn upsert_user(&self, user: NewUser) -> Result<User, StoreError> {
        let now = self.clock.now();
        let mut tables = self.write()?;

        if let Some(existing) = tables.users.values_mut().find(|u| u.email == user.email) {
            existing.name = user.name;
            existing.avatar = user.avatar;
            existing.google_id = user.google_id;
            return Ok(existing.clone());
        }

        let created = User {
            id: UserId::new(),
            email: user.email,
            name: user.name,
            avatar: user.avatar,
            google_id: user.google_id,
            created_at: now,
        };
        tables.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn list_jobs(
        &self,
        user_id: UserId,
        view: JobView,
    ) -> Result<Vec<JobWithCampaign>, StoreError> {
        let tables = self.read()?;
        let mut rows: Vec<JobWithCampaign> = tables
            .jobs_of(user_id)
            .filter(|j| view.matches(j))
            .filter_map(|j| tables.joined(j))
            .collect();
        view.sort(&mut rows);
        Ok(rows)
    }

    async fn job_stats(&self, user_id: UserId) -> Result<JobStats, StoreError> {
        let tables = self.read()?;
        let mut stats = JobStats::default();
        for job in tables.jobs_of(user_id) {
            stats.count(job);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use mailflow_campaigns::JobStatus;
    use mailflow_core::ManualClock;

    fn campaign(user_id: UserId) -> Campaign {
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        Campaign {
            id: CampaignId::new(),
            user_id,
            sender_id: SenderId::new(),
            name: "launch".to_string(),
            subject: "Hello".to_string(),
            body: "<p>hi</p>".to_string(),
            start_time: t,
            delay: 5,
            created_at: t,
        }
    }

    fn job_for(c: &Campaign, offset_secs: i64) -> EmailJob {
        EmailJob::pending(
            c.id,
            "a@x.io",
            c.start_time + Duration::seconds(offset_secs),
            c.created_at,
        )
    }

    #[tokio::test]
    async fn jobs_for_unknown_campaign_are_rejected_as_a_batch() {
        let store = InMemoryStore::new();
        let c = store.create_campaign(campaign(UserId::new())).await.unwrap();
        let orphan = campaign(UserId::new());

        let err = store
            .create_jobs(vec![job_for(&c, 0), job_for(&orphan, 0)])
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.job_count(), 0);
    }

    #[tokio::test]
    async fn find_job_with_campaign_joins_parent() {
        let store = InMemoryStore::new();
        let c = store.create_campaign(campaign(UserId::new())).await.unwrap();
        let j = job_for(&c, 0);
        store.create_jobs(vec![j.clone()]).await.unwrap();

        let found = store.find_job_with_campaign(j.id).await.unwrap().unwrap();
        assert_eq!(found.job, j);
        assert_eq!(found.campaign, c);
    }

    #[tokio::test]
    async fn update_of_missing_job_is_not_found() {
        let store = InMemoryStore::new();
        let err = store
            .update_job(EmailJobId::new(), JobPatch::failed("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "job", .. }));
    }

    #[tokio::test]
    async fn update_stamps_clock_time() {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let store = InMemoryStore::with_clock(clock.clone());
        let c = store.create_campaign(campaign(UserId::new())).await.unwrap();
        let j = job_for(&c, 0);
        store.create_jobs(vec![j.clone()]).await.unwrap();

        clock.advance(Duration::minutes(2));
        let updated = store
            .update_job(j.id, JobPatch::sent(clock.now()))
            .await
            .unwrap();

        assert_eq!(updated.status, JobStatus::Sent);
        assert_eq!(updated.updated_at, start + Duration::minutes(2));
    }

    #[tokio::test]
    async fn listings_are_scoped_to_the_owner_and_ordered() {
        let store = InMemoryStore::new();
        let owner = UserId::new();
        let c = store.create_campaign(campaign(owner)).await.unwrap();
        let other = store.create_campaign(campaign(UserId::new())).await.unwrap();

        let late = job_for(&c, 10);
        let early = job_for(&c, 0);
        store
            .create_jobs(vec![late.clone(), early.clone(), job_for(&other, 0)])
            .await
            .unwrap();

        let scheduled = store.list_jobs(owner, JobView::Scheduled).await.unwrap();
        let ids: Vec<_> = scheduled.iter().map(|r| r.job.id).collect();
        assert_eq!(ids, vec![early.id, late.id]);

        let stats = store.job_stats(owner).await.unwrap();
        assert_eq!(stats.scheduled, 2);
        assert_eq!(stats.sent, 0);
    }

    #[tokio::test]
    async fn upsert_user_refreshes_existing_email() {
        let store = InMemoryStore::new();
        let first = store
            .upsert_user(NewUser {
                email: "ada@x.io".to_string(),
                name: Some("Ada".to_string()),
                avatar: None,
                google_id: None,
            })
            .await
            .unwrap();
        let second = store
            .upsert_user(NewUser {
                email: "ada@x.io".to_string(),
                name: Some("Ada L.".to_string()),
                avatar: None,
                google_id: Some("g-1".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.name.as_deref(), Some("Ada L."));
        assert_eq!(second.google_id.as_deref(), Some("g-1"));
    }

    #[tokio::test]
    async fn delete_removes_job() {
        let store = InMemoryStore::new();
        let c = store.create_campaign(campaign(UserId::new())).await.unwrap();
        let j = job_for(&c, 0);
        store.create_jobs(vec![j.clone()]).await.unwrap();

        store.delete_job(j.id).await.unwrap();
        assert!(store.find_job(j.id).await.unwrap().is_none());
        assert!(store.delete_job(j.id).await.is_err());
    }
}
