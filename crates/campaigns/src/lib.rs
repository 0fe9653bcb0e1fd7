//! Campaign domain module.
//!
//! This crate contains the business rules for bulk email campaigns, implemented
//! purely as deterministic domain logic (no IO, no HTTP, no storage):
//! expanding a campaign into timed jobs, job state transitions, and the UTC
//! hour window used for per-sender quotas.

pub mod campaign;
pub mod job;
pub mod sender;
pub mod window;

pub use campaign::{Campaign, CampaignPlan, CampaignSpec, PlannedJob};
pub use job::{EmailJob, JobPatch, JobStats, JobStatus, JobView, JobWithCampaign};
pub use sender::{
    DEFAULT_TEST_SENDER_HOURLY_LIMIT, NewSender, NewSentEmail, NewUser, Sender, SentEmail,
    SmtpCredentials, User,
};
pub use window::HourWindow;
