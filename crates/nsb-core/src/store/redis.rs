//! Redis-backed payload store.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::debug;

use super::{PayloadStore, StoreError};
use crate::keygen::PayloadKeyGenerator;

/// Payload store backed by a Redis instance.
///
/// The Redis server must be started outside this program; the connection is
/// multiplexed, so clones of it can be used concurrently without locking.
/// `take` maps to `GETDEL` for the atomic get-and-delete.
pub struct RedisStore {
    conn: MultiplexedConnection,
    keys: PayloadKeyGenerator,
}

impl RedisStore {
    /// Connects to the Redis instance at `address:port`, selecting database
    /// `db_num`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the server is unreachable.
    pub async fn connect(
        client_id: &str,
        address: &str,
        port: u16,
        db_num: u32,
    ) -> Result<Self, StoreError> {
        let url = format!("redis://{address}:{port}/{db_num}");
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        debug!(address, port, db_num, "connected to payload store");
        Ok(Self {
            conn,
            keys: PayloadKeyGenerator::new(client_id),
        })
    }

    /// Pings the server to check connectivity.
    ///
    /// This round-trips to the store, so avoid it on latency-sensitive paths.
    pub async fn is_connected(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }
}

#[async_trait]
impl PayloadStore for RedisStore {
    async fn put(&self, value: &[u8]) -> Result<String, StoreError> {
        let key = self.keys.next_key();
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(&key)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(key)
    }

    async fn take(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::cmd("GETDEL")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        value.ok_or_else(|| StoreError::Missing {
            key: key.to_owned(),
        })
    }

    async fn peek(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        value.ok_or_else(|| StoreError::Missing {
            key: key.to_owned(),
        })
    }
}
