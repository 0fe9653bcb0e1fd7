//! Redis-backed durable delayed queue.
//!
//! ## Layout
//!
//! - `{queue}:jobs`    HASH  id -> JSON `BrokerRecord`
//! - `{queue}:delayed` ZSET  id scored by ready-at (unix millis)
//! - `{queue}:failed`  LIST  records that exhausted their attempts
//!
//! Claiming runs as one Lua script: due ids are removed from the delayed set
//! and their records read in the same step, so a failed claim takes nothing.
//! Only the caller whose `ZREM` returns 1 runs an entry. Completed entries are
//! deleted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{instrument, warn};

use mailflow_core::Clock;

use super::durable::{BrokerRecord, DurableQueue};
use super::supervisor::BrokerProbe;
use super::types::QueueEnvelope;
use super::{JobQueue, QueueError};
use crate::redis_conn::RedisConnector;

/// Takes due ids out of the delayed set and reads their records in a single
/// step. Returns a flat `[id, payload, id, payload, ...]` array. Ids whose
/// record is gone are dropped.
const CLAIM_DUE_SCRIPT: &str = r"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
local claimed = {}
for _, id in ipairs(ids) do
    if redis.call('ZREM', KEYS[1], id) == 1 then
        local payload = redis.call('HGET', KEYS[2], id)
        if payload then
            claimed[#claimed + 1] = id
            claimed[#claimed + 1] = payload
        end
    end
end
return claimed
";

#[derive(Debug, Clone)]
struct BrokerKeys {
    jobs: String,
    delayed: String,
    failed: String,
}

impl BrokerKeys {
    fn new(queue: &str) -> Self {
        Self {
            jobs: format!("{queue}:jobs"),
            delayed: format!("{queue}:delayed"),
            failed: format!("{queue}:failed"),
        }
    }
}

/// Producer side of the durable queue; also the broker liveness probe.
#[derive(Debug)]
pub struct BrokerQueue {
    redis: RedisConnector,
    keys: BrokerKeys,
    claim_script: redis::Script,
    clock: Arc<dyn Clock>,
}

impl BrokerQueue {
    pub fn open(redis_url: &str, queue: &str, clock: Arc<dyn Clock>) -> Result<Self, QueueError> {
        let redis = RedisConnector::open(redis_url).map_err(map_redis_error)?;
        Ok(Self {
            redis,
            keys: BrokerKeys::new(queue),
            claim_script: redis::Script::new(CLAIM_DUE_SCRIPT),
            clock,
        })
    }

    fn ready_at_ms(&self, delay: Duration) -> i64 {
        let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        self.clock.now().timestamp_millis().saturating_add(delay_ms)
    }

    async fn forget(&self, id: &str) -> Result<(), QueueError> {
        let mut conn = self.redis.connection().await.map_err(map_redis_error)?;
        let _: i64 = redis::cmd("HDEL")
            .arg(&self.keys.jobs)
            .arg(id)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }
}

#[async_trait]
impl DurableQueue for BrokerQueue {
    async fn schedule(&self, record: &BrokerRecord, delay: Duration) -> Result<(), QueueError> {
        let payload =
            serde_json::to_string(record).map_err(|e| QueueError::Serialization(e.to_string()))?;
        let mut conn = self.redis.connection().await.map_err(map_redis_error)?;

        let _: () = redis::pipe()
            .atomic()
            .cmd("HSET")
            .arg(&self.keys.jobs)
            .arg(record.id.to_string())
            .arg(payload)
            .ignore()
            .cmd("ZADD")
            .arg(&self.keys.delayed)
            .arg(self.ready_at_ms(delay))
            .arg(record.id.to_string())
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn claim_due(&self, limit: usize) -> Result<Vec<BrokerRecord>, QueueError> {
        let mut conn = self.redis.connection().await.map_err(map_redis_error)?;
        let now_ms = self.clock.now().timestamp_millis();

        let claimed: Vec<(String, String)> = self
            .claim_script
            .key(&self.keys.delayed)
            .key(&self.keys.jobs)
            .arg(now_ms)
            .arg(limit)
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        let (records, unreadable) = decode_claimed(claimed);
        for id in unreadable {
            if let Err(err) = self.forget(&id).await {
                warn!(entry = %id, error = %err, "failed to drop unreadable broker entry");
            }
        }
        Ok(records)
    }

    async fn complete(&self, record: &BrokerRecord) -> Result<(), QueueError> {
        self.forget(&record.id.to_string()).await
    }

    async fn bury(&self, record: &BrokerRecord) -> Result<(), QueueError> {
        let payload =
            serde_json::to_string(record).map_err(|e| QueueError::Serialization(e.to_string()))?;
        let mut conn = self.redis.connection().await.map_err(map_redis_error)?;

        let _: () = redis::pipe()
            .atomic()
            .cmd("HDEL")
            .arg(&self.keys.jobs)
            .arg(record.id.to_string())
            .ignore()
            .cmd("LPUSH")
            .arg(&self.keys.failed)
            .arg(payload)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for BrokerQueue {
    #[instrument(skip(self, envelope), fields(job_id = %envelope.job_id, kind = envelope.kind.as_str()), err)]
    async fn enqueue(&self, envelope: QueueEnvelope) -> Result<(), QueueError> {
        let record = BrokerRecord::new(&envelope, self.clock.now());
        self.schedule(&record, envelope.delay).await
    }
}

#[async_trait]
impl BrokerProbe for BrokerQueue {
    async fn ping(&self) -> Result<(), QueueError> {
        self.redis.ping().await.map_err(map_redis_error)
    }
}

/// Split a claim reply into readable records and ids whose payload did not
/// parse.
fn decode_claimed(claimed: Vec<(String, String)>) -> (Vec<BrokerRecord>, Vec<String>) {
    let mut records = Vec::with_capacity(claimed.len());
    let mut unreadable = Vec::new();
    for (id, payload) in claimed {
        match serde_json::from_str::<BrokerRecord>(&payload) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(entry = %id, error = %e, "dropping unreadable broker entry");
                unreadable.push(id);
            }
        }
    }
    (records, unreadable)
}

fn map_redis_error(e: redis::RedisError) -> QueueError {
    QueueError::Unavailable(e.to_string())
}
