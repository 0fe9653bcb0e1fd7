//! Infrastructure layer: storage, rate limiting, queueing, mail delivery and
//! the scheduling/dispatch services built on them.

pub mod mail;
pub mod queue;
pub mod rate_limit;
pub mod runtime;
pub mod scheduler;
pub mod store;
pub mod workers;

#[cfg(feature = "redis")]
pub mod redis_conn;

#[cfg(test)]
pub(crate) mod testing;


pub use runtime::{DispatchRuntime, RuntimeConfig};
pub use scheduler::{CampaignScheduler, ScheduleError};
