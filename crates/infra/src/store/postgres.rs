//! Postgres-backed store implementation.
//!
//! Queries are built at runtime with `sqlx::query` and rows are mapped by hand,
//! so the crate compiles without a live database.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `Conflict` |
//! | RowNotFound | N/A | `NotFound` |
//! | Anything else | Any | `Storage` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use mailflow_campaigns::{
    Campaign, EmailJob, JobPatch, JobStats, JobStatus, JobView, JobWithCampaign, NewSender,
    NewSentEmail, NewUser, Sender, SentEmail, User,
};
use mailflow_core::{EmailJobId, SenderId, SentEmailId, UserId};

use super::{CampaignStore, StoreError};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const JOB_COLUMNS: &str = "j.id, j.campaign_id, j.recipient, j.scheduled_time, j.status, \
     j.sent_at, j.error, j.is_starred, j.is_archived, j.created_at, j.updated_at";

const CAMPAIGN_COLUMNS: &str = "c.id AS c_id, c.user_id AS c_user_id, c.sender_id AS c_sender_id, \
     c.name AS c_name, c.subject AS c_subject, c.body AS c_body, c.start_time AS c_start_time, \
     c.delay_secs AS c_delay_secs, c.created_at AS c_created_at";

const SENDER_COLUMNS: &str =
    "id, user_id, email, host, port, user_auth, pass_auth, hourly_limit, created_at";

/// Postgres-backed store.
///
/// Uses the SQLx connection pool, which is `Send + Sync`. Bulk job inserts run
/// in a single transaction.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect and apply the bundled schema (idempotent).
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

#[async_trait]
impl CampaignStore for PostgresStore {
    #[instrument(skip(self, campaign), fields(campaign_id = %campaign.id), err)]
    async fn create_campaign(&self, campaign: Campaign) -> Result<Campaign, StoreError> {
        let delay = i64::try_from(campaign.delay)
            .map_err(|_| StoreError::Storage("delay out of range".to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO campaigns
                (id, user_id, sender_id, name, subject, body, start_time, delay_secs, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(campaign.id.as_uuid())
        .bind(campaign.user_id.as_uuid())
        .bind(campaign.sender_id.as_uuid())
        .bind(&campaign.name)
        .bind(&campaign.subject)
        .bind(&campaign.body)
        .bind(campaign.start_time)
        .bind(delay)
        .bind(campaign.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_campaign", e))?;

        Ok(campaign)
    }

    #[instrument(skip(self, jobs), fields(job_count = jobs.len()), err)]
    async fn create_jobs(&self, jobs: Vec<EmailJob>) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("create_jobs", e))?;

        for job in &jobs {
            sqlx::query(
                r#"
                INSERT INTO email_jobs
                    (id, campaign_id, recipient, scheduled_time, status, sent_at, error,
                     is_starred, is_archived, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(job.id.as_uuid())
            .bind(job.campaign_id.as_uuid())
            .bind(&job.recipient)
            .bind(job.scheduled_time)
            .bind(job.status.as_str())
            .bind(job.sent_at)
            .bind(&job.error)
            .bind(job.is_starred)
            .bind(job.is_archived)
            .bind(job.created_at)
            .bind(job.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("create_jobs", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("create_jobs", e))
    }

    async fn find_job(&self, id: EmailJobId) -> Result<Option<EmailJob>, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM email_jobs j WHERE j.id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_job", e))?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn find_job_with_campaign(
        &self,
        id: EmailJobId,
    ) -> Result<Option<JobWithCampaign>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS}, {CAMPAIGN_COLUMNS} \
             FROM email_jobs j JOIN campaigns c ON c.id = j.campaign_id \
             WHERE j.id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_job_with_campaign", e))?;

        row.as_ref().map(joined_from_row).transpose()
    }

    #[instrument(skip(self, patch), fields(job_id = %id), err)]
    async fn update_job(&self, id: EmailJobId, patch: JobPatch) -> Result<EmailJob, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE email_jobs j SET
                status = COALESCE($2, j.status),
                sent_at = COALESCE($3, j.sent_at),
                error = COALESCE($4, j.error),
                is_starred = COALESCE($5, j.is_starred),
                is_archived = COALESCE($6, j.is_archived),
                updated_at = $7
            WHERE j.id = $1
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.sent_at)
        .bind(patch.error.as_deref())
        .bind(patch.is_starred)
        .bind(patch.is_archived)
        .bind(Utc::now())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_job", e))?;

        match row {
            Some(row) => job_from_row(&row),
            None => Err(StoreError::not_found("job", id)),
        }
    }

    async fn delete_job(&self, id: EmailJobId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM email_jobs WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_job", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("job", id));
        }
        Ok(())
    }

    async fn find_sender(&self, id: SenderId) -> Result<Option<Sender>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SENDER_COLUMNS} FROM email_accounts WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_sender", e))?;

        row.as_ref().map(sender_from_row).transpose()
    }

    #[instrument(skip(self, sender), fields(user_id = %sender.user_id), err)]
    async fn create_sender(&self, sender: NewSender) -> Result<Sender, StoreError> {
        let hourly_limit = i32::try_from(sender.hourly_limit)
            .map_err(|_| StoreError::Storage("hourly limit out of range".to_string()))?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO email_accounts
                (id, user_id, email, host, port, user_auth, pass_auth, hourly_limit, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {SENDER_COLUMNS}
            "#
        ))
        .bind(SenderId::new().as_uuid())
        .bind(sender.user_id.as_uuid())
        .bind(&sender.email)
        .bind(&sender.host)
        .bind(i32::from(sender.port))
        .bind(&sender.auth_user)
        .bind(&sender.auth_pass)
        .bind(hourly_limit)
        .bind(Utc::now())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_sender", e))?;

        sender_from_row(&row)
    }

    async fn list_senders(&self, user_id: UserId) -> Result<Vec<Sender>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SENDER_COLUMNS} FROM email_accounts WHERE user_id = $1 ORDER BY created_at"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_senders", e))?;

        rows.iter().map(sender_from_row).collect()
    }

    async fn create_sent_email(&self, record: NewSentEmail) -> Result<SentEmail, StoreError> {
        let sent = SentEmail {
            id: SentEmailId::new(),
            sender_id: record.sender_id,
            recipient: record.recipient,
            subject: record.subject,
            sent_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO sent_emails (id, email_account_id, recipient, subject, sent_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(sent.id.as_uuid())
        .bind(sent.sender_id.as_uuid())
        .bind(&sent.recipient)
        .bind(&sent.subject)
        .bind(sent.sent_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_sent_email", e))?;

        Ok(sent)
    }

    async fn upsert_user(&self, user: NewUser) -> Result<User, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO users (id, email, name, avatar, google_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (email) DO UPDATE SET
                name = EXCLUDED.name,
                avatar = EXCLUDED.avatar,
                google_id = EXCLUDED.google_id
            RETURNING id, email, name, avatar, google_id, created_at
            "#,
        )
        .bind(UserId::new().as_uuid())
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.avatar)
        .bind(&user.google_id)
        .bind(Utc::now())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_user", e))?;

        Ok(User {
            id: UserId::from_uuid(get(&row, "id")?),
            email: get(&row, "email")?,
            name: get(&row, "name")?,
            avatar: get(&row, "avatar")?,
            google_id: get(&row, "google_id")?,
            created_at: get(&row, "created_at")?,
        })
    }

    async fn list_jobs(
        &self,
        user_id: UserId,
        view: JobView,
    ) -> Result<Vec<JobWithCampaign>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS}, {CAMPAIGN_COLUMNS} \
             FROM email_jobs j JOIN campaigns c ON c.id = j.campaign_id \
             WHERE c.user_id = $1 AND {}",
            view_clause(view)
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_jobs", e))?;

        rows.iter().map(joined_from_row).collect()
    }

    async fn job_stats(&self, user_id: UserId) -> Result<JobStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE j.status = 'PENDING' AND NOT j.is_archived) AS scheduled,
                COUNT(*) FILTER (WHERE j.status = 'SENT' AND NOT j.is_archived) AS sent,
                COUNT(*) FILTER (WHERE j.is_archived) AS archived
            FROM email_jobs j JOIN campaigns c ON c.id = j.campaign_id
            WHERE c.user_id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("job_stats", e))?;

        let count = |name: &str| -> Result<u64, StoreError> {
            let n: i64 = get(&row, name)?;
            Ok(u64::try_from(n).unwrap_or_default())
        };

        Ok(JobStats {
            scheduled: count("scheduled")?,
            sent: count("sent")?,
            archived: count("archived")?,
        })
    }
}

/// WHERE/ORDER BY fragment for a mailbox view.
fn view_clause(view: JobView) -> &'static str {
    match view {
        JobView::Scheduled => {
            "j.status = 'PENDING' AND NOT j.is_archived ORDER BY j.scheduled_time ASC"
        }
        JobView::Sent => "j.status = 'SENT' AND NOT j.is_archived ORDER BY j.sent_at DESC",
        JobView::Archived => "j.is_archived ORDER BY j.updated_at DESC",
        JobView::All => "NOT j.is_archived ORDER BY j.updated_at DESC",
    }
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Storage(format!("failed to decode column {column}: {e}")))
}

fn job_from_row(row: &PgRow) -> Result<EmailJob, StoreError> {
    let status: String = get(row, "status")?;
    let status = JobStatus::parse(&status)
        .ok_or_else(|| StoreError::Storage(format!("unknown job status: {status}")))?;

    Ok(EmailJob {
        id: EmailJobId::from_uuid(get(row, "id")?),
        campaign_id: get::<Uuid>(row, "campaign_id")?.into(),
        recipient: get(row, "recipient")?,
        scheduled_time: get(row, "scheduled_time")?,
        status,
        sent_at: get::<Option<DateTime<Utc>>>(row, "sent_at")?,
        error: get(row, "error")?,
        is_starred: get(row, "is_starred")?,
        is_archived: get(row, "is_archived")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn campaign_from_row(row: &PgRow) -> Result<Campaign, StoreError> {
    let delay: i64 = get(row, "c_delay_secs")?;

    Ok(Campaign {
        id: get::<Uuid>(row, "c_id")?.into(),
        user_id: get::<Uuid>(row, "c_user_id")?.into(),
        sender_id: get::<Uuid>(row, "c_sender_id")?.into(),
        name: get(row, "c_name")?,
        subject: get(row, "c_subject")?,
        body: get(row, "c_body")?,
        start_time: get(row, "c_start_time")?,
        delay: u64::try_from(delay)
            .map_err(|_| StoreError::Storage(format!("negative campaign delay: {delay}")))?,
        created_at: get(row, "c_created_at")?,
    })
}

fn joined_from_row(row: &PgRow) -> Result<JobWithCampaign, StoreError> {
    Ok(JobWithCampaign {
        job: job_from_row(row)?,
        campaign: campaign_from_row(row)?,
    })
}

fn sender_from_row(row: &PgRow) -> Result<Sender, StoreError> {
    let port: i32 = get(row, "port")?;
    let hourly_limit: i32 = get(row, "hourly_limit")?;

    Ok(Sender {
        id: get::<Uuid>(row, "id")?.into(),
        user_id: get::<Uuid>(row, "user_id")?.into(),
        email: get(row, "email")?,
        host: get(row, "host")?,
        port: u16::try_from(port)
            .map_err(|_| StoreError::Storage(format!("invalid sender port: {port}")))?,
        auth_user: get(row, "user_auth")?,
        auth_pass: get(row, "pass_auth")?,
        hourly_limit: u32::try_from(hourly_limit).unwrap_or_default(),
        created_at: get(row, "created_at")?,
    })
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &str, e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::RowNotFound => StoreError::NotFound {
            entity: "row",
            id: operation.to_string(),
        },
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("23505") | Some("23503") => {
                StoreError::Conflict(format!("{operation}: {}", db.message()))
            }
            _ => StoreError::Storage(format!("{operation}: {e}")),
        },
        _ => StoreError::Storage(format!("{operation}: {e}")),
    }
}
