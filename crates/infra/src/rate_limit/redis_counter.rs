use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use mailflow_campaigns::HourWindow;
use mailflow_core::{Clock, SenderId};

use super::{COUNTER_TTL_SECS, RateLimitError, RateLimiter};
use crate::redis_conn::RedisConnector;

/// Hourly counters kept in Redis so every worker process shares one quota.
#[derive(Debug)]
pub struct RedisRateLimiter {
    redis: RedisConnector,
    clock: Arc<dyn Clock>,
}

impl RedisRateLimiter {
    pub fn new(redis_url: &str, clock: Arc<dyn Clock>) -> Result<Self, RateLimitError> {
        let redis = RedisConnector::open(redis_url).map_err(map_redis_error)?;
        Ok(Self { redis, clock })
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    #[instrument(skip(self), err)]
    async fn can_send(&self, sender_id: SenderId, limit: u32) -> Result<bool, RateLimitError> {
        let key = HourWindow::containing(self.clock.now()).key(sender_id);
        let mut conn = self.redis.connection().await.map_err(map_redis_error)?;

        let count: Option<u64> = redis::cmd("GET")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        Ok(count.unwrap_or(0) < u64::from(limit))
    }

    #[instrument(skip(self), err)]
    async fn increment(&self, sender_id: SenderId) -> Result<(), RateLimitError> {
        let key = HourWindow::containing(self.clock.now()).key(sender_id);
        let mut conn = self.redis.connection().await.map_err(map_redis_error)?;

        let _: i64 = redis::cmd("INCR")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        // -1 means the key exists without an expiry: first write of this window,
        // or a previous EXPIRE never landed.
        let ttl: i64 = redis::cmd("TTL")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        if ttl == -1 {
            let _: i64 = redis::cmd("EXPIRE")
                .arg(&key)
                .arg(COUNTER_TTL_SECS)
                .query_async(&mut conn)
                .await
                .map_err(map_redis_error)?;
        }
        Ok(())
    }
}

fn map_redis_error(e: redis::RedisError) -> RateLimitError {
    match e.kind() {
        redis::ErrorKind::TypeError => RateLimitError::Corrupt(e.to_string()),
        _ => RateLimitError::Unavailable(e.to_string()),
    }
}
