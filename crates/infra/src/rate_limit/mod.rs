//! Per-sender hourly send quota.
//!
//! Counters are keyed by `(sender, UTC date, UTC hour)`, so every UTC clock hour
//! starts from zero without an explicit reset. Two backends:
//! - `InMemoryRateLimiter`: process-local map
//! - `RedisRateLimiter` (feature `redis`): shared counter with atomic `INCR`
//!
//! The backend is chosen once at start (`select_rate_limiter`) and never swapped.

mod in_memory;
#[cfg(feature = "redis")]
mod redis_counter;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use mailflow_core::{Clock, SenderId};

pub use in_memory::InMemoryRateLimiter;
#[cfg(feature = "redis")]
pub use redis_counter::RedisRateLimiter;

/// Redis address that counts as "not configured" for the shared limiter.
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

/// Counter lifetime, armed on the first increment of a window.
pub const COUNTER_TTL_SECS: u64 = 3600;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("rate limit backend unavailable: {0}")]
    Unavailable(String),

    #[error("rate limit counter corrupt: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// True iff fewer than `limit` sends were recorded in the current UTC hour.
    async fn can_send(&self, sender_id: SenderId, limit: u32) -> Result<bool, RateLimitError>;

    /// Record one send in the current UTC hour.
    async fn increment(&self, sender_id: SenderId) -> Result<(), RateLimitError>;
}

#[async_trait]
impl<R> RateLimiter for Arc<R>
where
    R: RateLimiter + ?Sized,
{
    async fn can_send(&self, sender_id: SenderId, limit: u32) -> Result<bool, RateLimitError> {
        (**self).can_send(sender_id, limit).await
    }

    async fn increment(&self, sender_id: SenderId) -> Result<(), RateLimitError> {
        (**self).increment(sender_id).await
    }
}

/// True when the shared counter backend should be used for `redis_url`.
pub fn uses_shared_counters(redis_url: Option<&str>) -> bool {
    redis_url.is_some_and(|url| !url.is_empty() && url != DEFAULT_REDIS_URL)
}

/// Pick the limiter backend for this process.
///
/// The shared backend is used only when the Redis address is explicitly set to
/// something other than the local default.
pub fn select_rate_limiter(
    redis_url: Option<&str>,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn RateLimiter>, RateLimitError> {
    #[cfg(feature = "redis")]
    {
        if let Some(url) = redis_url.filter(|url| uses_shared_counters(Some(url))) {
            tracing::info!("rate limiter: using shared redis counters");
            return Ok(Arc::new(RedisRateLimiter::new(url, clock)?));
        }
    }

    #[cfg(not(feature = "redis"))]
    {
        if uses_shared_counters(redis_url) {
            tracing::warn!("redis support not compiled in; rate limiter uses local counters");
        }
    }

    tracing::info!("rate limiter: using in-memory counters");
    Ok(Arc::new(InMemoryRateLimiter::new(clock)))
}
