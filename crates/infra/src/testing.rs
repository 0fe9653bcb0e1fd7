//! Test doubles shared by unit and scenario tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use mailflow_campaigns::{
    Campaign, EmailJob, JobPatch, JobStats, JobView, JobWithCampaign, NewSender, NewSentEmail,
    NewUser, Sender, SentEmail, SmtpCredentials, User,
};
use mailflow_core::{EmailJobId, SenderId, UserId};

use crate::mail::{DeliveryInfo, MailTransport, OutgoingMail, TransportError};
use crate::queue::{JobQueue, QueueEnvelope, QueueError};
use crate::store::{CampaignStore, InMemoryStore, StoreError};

/// Records every message; can be told to fail upcoming sends.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(SmtpCredentials, OutgoingMail)>>,
    failures: Mutex<VecDeque<String>>,
}

impl RecordingTransport {
    pub fn fail_next(&self, message: &str) {
        self.failures.lock().unwrap().push_back(message.to_string());
    }

    pub fn sent(&self) -> Vec<(SmtpCredentials, OutgoingMail)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn recipients(&self) -> Vec<String> {
        self.sent().into_iter().map(|(_, mail)| mail.to).collect()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(
        &self,
        credentials: &SmtpCredentials,
        mail: &OutgoingMail,
    ) -> Result<DeliveryInfo, TransportError> {
        if let Some(reason) = self.failures.lock().unwrap().pop_front() {
            return Err(TransportError::Smtp(reason));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((credentials.clone(), mail.clone()));
        Ok(DeliveryInfo {
            message_id: format!("<test-{}@localhost>", sent.len()),
            response: "250 OK".into(),
        })
    }
}

/// Captures envelopes instead of scheduling them.
#[derive(Debug, Default)]
pub struct RecordingQueue {
    envelopes: Mutex<Vec<QueueEnvelope>>,
    unavailable: Mutex<bool>,
}

impl RecordingQueue {
    pub fn unavailable() -> Self {
        Self {
            unavailable: Mutex::new(true),
            ..Self::default()
        }
    }

    pub fn envelopes(&self) -> Vec<QueueEnvelope> {
        self.envelopes.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue(&self, envelope: QueueEnvelope) -> Result<(), QueueError> {
        if *self.unavailable.lock().unwrap() {
            return Err(QueueError::Unavailable("connection refused".into()));
        }
        self.envelopes.lock().unwrap().push(envelope);
        Ok(())
    }
}

/// In-memory store with switchable write failures.
#[derive(Debug)]
pub struct FaultyStore {
    inner: Arc<InMemoryStore>,
    fail_job_inserts: bool,
    fail_job_updates: bool,
}

impl FaultyStore {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            fail_job_inserts: false,
            fail_job_updates: false,
        }
    }

    pub fn failing_job_inserts(mut self) -> Self {
        self.fail_job_inserts = true;
        self
    }

    pub fn failing_job_updates(mut self) -> Self {
        self.fail_job_updates = true;
        self
    }
}

#[async_trait]
impl CampaignStore for FaultyStore {
    async fn create_campaign(&self, campaign: Campaign) -> Result<Campaign, StoreError> {
        self.inner.create_campaign(campaign).await
    }
    async fn create_jobs(&self, jobs: Vec<EmailJob>) -> Result<(), StoreError> {
        if self.fail_job_inserts {
            return Err(StoreError::Storage("disk full".into()));
        }
        self.inner.create_jobs(jobs).await
    }
    async fn find_job(&self, id: EmailJobId) -> Result<Option<EmailJob>, StoreError> {
        self.inner.find_job(id).await
    }
    async fn find_job_with_campaign(
        &self,
        id: EmailJobId,
    ) -> Result<Option<JobWithCampaign>, StoreError> {
        self.inner.find_job_with_campaign(id).await
    }
    async fn update_job(&self, id: EmailJobId, patch: JobPatch) -> Result<EmailJob, StoreError> {
        if self.fail_job_updates {
            return Err(StoreError::Storage("connection reset".into()));
        }
        self.inner.update_job(id, patch).await
    }
    async fn delete_job(&self, id: EmailJobId) -> Result<(), StoreError> {
        self.inner.delete_job(id).await
    }
    async fn find_sender(&self, id: SenderId) -> Result<Option<Sender>, StoreError> {
        self.inner.find_sender(id).await
    }
    async fn create_sender(&self, sender: NewSender) -> Result<Sender, StoreError> {
        self.inner.create_sender(sender).await
    }
    async fn list_senders(&self, user_id: UserId) -> Result<Vec<Sender>, StoreError> {
        self.inner.list_senders(user_id).await
    }
    async fn create_sent_email(&self, record: NewSentEmail) -> Result<SentEmail, StoreError> {
        self.inner.create_sent_email(record).await
    }
    async fn upsert_user(&self, user: NewUser) -> Result<User, StoreError> {
        self.inner.upsert_user(user).await
    }
    async fn list_jobs(
        &self,
        user_id: UserId,
        view: JobView,
    ) -> Result<Vec<JobWithCampaign>, StoreError> {
        self.inner.list_jobs(user_id, view).await
    }
    async fn job_stats(&self, user_id: UserId) -> Result<JobStats, StoreError> {
        self.inner.job_stats(user_id).await
    }
}
