use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use mailflow_campaigns::HourWindow;
use mailflow_core::{Clock, SenderId};

use super::{COUNTER_TTL_SECS, RateLimitError, RateLimiter};

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    expires_at: DateTime<Utc>,
}

/// Process-local hourly counters.
///
/// The mutex makes `increment` linearizable per key. Expired windows are
/// dropped on write.
#[derive(Debug)]
pub struct InMemoryRateLimiter {
    counters: Mutex<HashMap<String, Counter>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryRateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Current count for the sender's active window.
    pub fn current(&self, sender_id: SenderId) -> Result<u64, RateLimitError> {
        let now = self.clock.now();
        let key = HourWindow::containing(now).key(sender_id);
        let counters = self.counters.lock().map_err(|_| poisoned())?;
        Ok(counters
            .get(&key)
            .filter(|c| c.expires_at > now)
            .map(|c| c.count)
            .unwrap_or(0))
    }

    /// Number of live counter keys.
    pub fn tracked_keys(&self) -> usize {
        self.counters.lock().map(|c| c.len()).unwrap_or_default()
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn can_send(&self, sender_id: SenderId, limit: u32) -> Result<bool, RateLimitError> {
        Ok(self.current(sender_id)? < u64::from(limit))
    }

    async fn increment(&self, sender_id: SenderId) -> Result<(), RateLimitError> {
        let now = self.clock.now();
        let key = HourWindow::containing(now).key(sender_id);
        let mut counters = self.counters.lock().map_err(|_| poisoned())?;

        counters.retain(|_, c| c.expires_at > now);
        counters
            .entry(key)
            .or_insert(Counter {
                count: 0,
                expires_at: now + Duration::seconds(COUNTER_TTL_SECS as i64),
            })
            .count += 1;
        Ok(())
    }
}

fn poisoned() -> RateLimitError {
    RateLimitError::Unavailable("lock poisoned".to_string())
}
