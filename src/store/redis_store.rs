use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use super::{ExpiringStore, StoreResult, StoredEntry};
use crate::core::Clock;

/// Expiring store backed by Redis keys with `EX` expiry
pub struct RedisStore {
    /// Multiplexed connection, reconnects on failure
    conn: ConnectionManager,
    /// Used to turn relative TTLs into absolute expiry times on scan
    clock: Arc<dyn Clock>,
}

impl RedisStore {
    /// Connect to the Redis instance at `redis_url`
    pub async fn connect(redis_url: &str, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = client.get_tokio_connection_manager().await?;

        tracing::info!(redis_url = %redis_url, "Connected to Redis store");

        Ok(Self { conn, clock })
    }
}

#[async_trait]
impl ExpiringStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        // Redis rejects EX 0
        let ttl = ttl_seconds.max(1) as usize;
        conn.set_ex::<_, _, ()>(key, value, ttl).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<StoredEntry>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", escape_glob(prefix));

        let keys: Vec<String> = {
            let mut iter = conn.scan_match::<_, String>(pattern).await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        let now = self.clock.now_unix_sec();
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let ttl: i64 = conn.ttl(&key).await?;
            match ttl {
                // Key vanished between SCAN and TTL
                -2 => continue,
                -1 => entries.push(StoredEntry { key, expires_at: None }),
                ttl => entries.push(StoredEntry {
                    key,
                    expires_at: Some(now.saturating_add(ttl.max(0) as u64)),
                }),
            }
        }

        Ok(entries)
    }
}

fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
