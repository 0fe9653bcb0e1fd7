//! Lazily-established, auto-reconnecting Redis connection shared by the
//! broker queue and the shared rate limiter.

use redis::aio::ConnectionManager;
use tokio::sync::OnceCell;

/// Owns a Redis client and connects on first use.
///
/// A failed first connect is not cached; the next call tries again. After a
/// successful connect the `ConnectionManager` reconnects on its own.
pub struct RedisConnector {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
}

impl core::fmt::Debug for RedisConnector {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisConnector")
            .field("connected", &self.conn.initialized())
            .finish()
    }
}

impl RedisConnector {
    /// Parse the address. Does not touch the network.
    pub fn open(url: &str) -> Result<Self, redis::RedisError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            conn: OnceCell::new(),
        })
    }

    pub async fn connection(&self) -> Result<ConnectionManager, redis::RedisError> {
        let conn = self
            .conn
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        Ok(conn.clone())
    }

    pub async fn ping(&self) -> Result<(), redis::RedisError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
