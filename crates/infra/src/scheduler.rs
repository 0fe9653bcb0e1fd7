//! Campaign scheduling: persist a campaign and its jobs, then arm one queue
//! envelope per job.
//!
//! Rows are written before anything is enqueued, so a fired envelope always
//! finds its job. If persisting fails nothing is enqueued.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument, warn};

use mailflow_campaigns::{Campaign, CampaignSpec};
use mailflow_core::{Clock, DomainError, UserId};

use crate::queue::{JobQueue, QueueEnvelope, QueueError};
use crate::store::{CampaignStore, StoreError};

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid campaign: {0}")]
    InvalidSpec(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to enqueue job: {0}")]
    Queue(#[from] QueueError),
}

pub struct CampaignScheduler<S, Q>
where
    S: CampaignStore + ?Sized,
    Q: JobQueue + ?Sized,
{
    store: Arc<S>,
    queue: Arc<Q>,
    clock: Arc<dyn Clock>,
}

impl<S, Q> core::fmt::Debug for CampaignScheduler<S, Q>
where
    S: CampaignStore + ?Sized,
    Q: JobQueue + ?Sized,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CampaignScheduler")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl<S, Q> CampaignScheduler<S, Q>
where
    S: CampaignStore + ?Sized,
    Q: JobQueue + ?Sized,
{
    pub fn new(store: Arc<S>, queue: Arc<Q>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            queue,
            clock,
        }
    }

    /// Job `i` is scheduled at `start_time + i * delay` seconds and enqueued
    /// with `max(0, scheduled - now)`.
    #[instrument(skip(self, spec), fields(campaign = %spec.name, recipients = spec.recipients.len()), err)]
    pub async fn schedule_campaign(
        &self,
        user_id: UserId,
        spec: CampaignSpec,
    ) -> Result<Campaign, ScheduleError> {
        let now = self.clock.now();
        let plan = spec.plan(user_id, now)?;

        let campaign = self.store.create_campaign(plan.campaign).await?;
        let sender_id = campaign.sender_id;
        let (jobs, delays): (Vec<_>, Vec<_>) = plan
            .jobs
            .into_iter()
            .map(|planned| (planned.job, planned.enqueue_delay))
            .unzip();
        let ids: Vec<_> = jobs.iter().map(|job| job.id).collect();
        let job_count = ids.len();
        self.store.create_jobs(jobs).await?;

        for (index, (job_id, delay)) in ids.into_iter().zip(delays).enumerate() {
            if let Err(err) = self
                .queue
                .enqueue(QueueEnvelope::send(job_id, sender_id, delay))
                .await
            {
                // Rows stay PENDING; they are visible but have no timer.
                warn!(campaign_id = %campaign.id, %job_id, index, error = %err, "enqueue failed");
                return Err(err.into());
            }
        }

        info!(campaign_id = %campaign.id, %sender_id, jobs = job_count, "campaign scheduled");
        Ok(campaign)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use mailflow_campaigns::JobStatus;
    use mailflow_core::{ManualClock, SenderId};

    use crate::store::InMemoryStore;
    use crate::testing::{FaultyStore, RecordingQueue};

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap(),
        ))
    }

    fn spec(start_offset_secs: i64, delay: u64, recipients: &[&str]) -> CampaignSpec {
        CampaignSpec {
            name: "Launch".into(),
            subject: "We are live".into(),
            body: "<p>hello</p>".into(),
            start_time: Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap()
                + chrono::Duration::seconds(start_offset_secs),
            delay,
            recipients: recipients.iter().map(|r| r.to_string()).collect(),
            sender_id: SenderId::new(),
        }
    }

    #[tokio::test]
    async fn jobs_are_persisted_then_enqueued_with_staggered_delays() {
        let clock = clock();
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let queue = Arc::new(RecordingQueue::default());
        let scheduler = CampaignScheduler::new(store.clone(), queue.clone(), clock.clone());

        let campaign = scheduler
            .schedule_campaign(UserId::new(), spec(60, 5, &["a@x.test", "b@x.test", "c@x.test"]))
            .await
            .unwrap();

        let envelopes = queue.envelopes();
        assert_eq!(envelopes.len(), 3);
        let delays: Vec<_> = envelopes.iter().map(|e| e.delay).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(60),
                Duration::from_secs(65),
                Duration::from_secs(70)
            ]
        );

        for envelope in &envelopes {
            assert_eq!(envelope.sender_id, campaign.sender_id);
            let job = store.find_job(envelope.job_id).await.unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Pending);
            assert_eq!(job.campaign_id, campaign.id);
        }
    }

    #[tokio::test]
    async fn start_time_in_the_past_enqueues_with_zero_delay() {
        let clock = clock();
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let queue = Arc::new(RecordingQueue::default());
        let scheduler = CampaignScheduler::new(store, queue.clone(), clock);

        scheduler
            .schedule_campaign(UserId::new(), spec(-600, 0, &["a@x.test", "b@x.test"]))
            .await
            .unwrap();

        assert!(queue.envelopes().iter().all(|e| e.delay.is_zero()));
    }

    #[tokio::test]
    async fn invalid_spec_persists_nothing() {
        let clock = clock();
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let queue = Arc::new(RecordingQueue::default());
        let scheduler = CampaignScheduler::new(store.clone(), queue.clone(), clock);

        let err = scheduler
            .schedule_campaign(UserId::new(), spec(0, 5, &[]))
            .await
            .unwrap_err();

        assert!(matches!(err, ScheduleError::InvalidSpec(_)));
        assert_eq!(store.job_count(), 0);
        assert!(queue.envelopes().is_empty());
    }

    #[tokio::test]
    async fn store_failure_enqueues_nothing() {
        let clock = clock();
        let inner = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let store = Arc::new(FaultyStore::new(inner).failing_job_inserts());
        let queue = Arc::new(RecordingQueue::default());
        let scheduler = CampaignScheduler::new(store, queue.clone(), clock);

        let err = scheduler
            .schedule_campaign(UserId::new(), spec(0, 1, &["a@x.test"]))
            .await
            .unwrap_err();

        assert!(matches!(err, ScheduleError::Store(StoreError::Storage(_))));
        assert!(queue.envelopes().is_empty());
    }

    #[tokio::test]
    async fn queue_failure_surfaces_after_rows_are_written() {
        let clock = clock();
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let queue = Arc::new(RecordingQueue::unavailable());
        let scheduler = CampaignScheduler::new(store.clone(), queue, clock);

        let err = scheduler
            .schedule_campaign(UserId::new(), spec(0, 1, &["a@x.test", "b@x.test"]))
            .await
            .unwrap_err();

        assert!(matches!(err, ScheduleError::Queue(QueueError::Unavailable(_))));
        assert_eq!(store.job_count(), 2);
    }
}
