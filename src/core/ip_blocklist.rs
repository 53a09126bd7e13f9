use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::store::{ExpiringStore, StoreKeys, StoreResult};

/// A temporary block held against one IP
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    /// Abuse pattern (or other reason) that caused the block
    pub reason: String,
    /// Unix timestamp the block started
    pub blocked_at: u64,
    /// Block length in seconds
    pub duration: u64,
    /// `blocked_at + duration`
    pub expires_at: u64,
}

impl BlockRecord {
    pub fn new(reason: impl Into<String>, blocked_at: u64, duration: u64) -> Self {
        Self {
            reason: reason.into(),
            blocked_at,
            duration,
            expires_at: blocked_at.saturating_add(duration),
        }
    }

    pub fn remaining_seconds(&self, now: u64) -> u64 {
        self.expires_at.saturating_sub(now)
    }
}

/// IP block records kept in the expiring store.
///
/// A record's TTL equals its duration, so expiry needs no bookkeeping here.
pub struct IpBlocklist {
    store: Arc<dyn ExpiringStore>,
    keys: StoreKeys,
}

impl IpBlocklist {
    pub fn new(store: Arc<dyn ExpiringStore>, keys: StoreKeys) -> Self {
        Self { store, keys }
    }

    /// Add an IP to the blocklist for `record.duration` seconds
    pub async fn add(&self, ip: &str, record: &BlockRecord) -> StoreResult<()> {
        let payload = serde_json::to_string(record)?;
        self.store
            .set(&self.keys.block(ip), &payload, record.duration)
            .await
    }

    /// Remove an IP from the blocklist, returning whether a live block existed
    pub async fn remove(&self, ip: &str) -> StoreResult<bool> {
        if self.get(ip).await?.is_none() {
            return Ok(false);
        }
        self.store.delete(&self.keys.block(ip)).await
    }

    /// Check if an IP is blocked
    pub async fn is_blocked(&self, ip: &str) -> StoreResult<bool> {
        Ok(self.store.get(&self.keys.block(ip)).await?.is_some())
    }

    pub async fn get(&self, ip: &str) -> StoreResult<Option<BlockRecord>> {
        match self.store.get(&self.keys.block(ip)).await? {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Get all IPs holding a live block
    pub async fn list(&self, now: u64) -> StoreResult<Vec<(String, BlockRecord)>> {
        let prefix = self.keys.block_prefix();
        let entries = self.store.scan_prefix(&prefix).await?;

        let mut blocked = Vec::new();
        for entry in entries.into_iter().filter(|entry| !entry.is_expired(now)) {
            let ip = entry.key[prefix.len()..].to_string();
            if let Some(record) = self.get(&ip).await? {
                blocked.push((ip, record));
            }
        }
        blocked.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(blocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Clock, MockClock};
    use crate::store::MemoryStore;

    fn blocklist(clock: Arc<MockClock>) -> IpBlocklist {
        IpBlocklist::new(Arc::new(MemoryStore::new(clock)), StoreKeys::default())
    }

    #[test]
    fn expiry_is_derived_from_duration() {
        let record = BlockRecord::new("topic_scanning", 1_000, 600);
        assert_eq!(record.expires_at, 1_600);
        assert_eq!(record.remaining_seconds(1_500), 100);
        assert_eq!(record.remaining_seconds(2_000), 0);
    }

    #[tokio::test]
    async fn blocks_lapse_with_their_ttl() {
        let clock = Arc::new(MockClock::new(1_000));
        let list = blocklist(clock.clone());

        list.add("1.2.3.4", &BlockRecord::new("rapid_requests", 1_000, 300)).await.unwrap();
        assert!(list.is_blocked("1.2.3.4").await.unwrap());

        clock.advance(300);
        assert!(!list.is_blocked("1.2.3.4").await.unwrap());
        assert!(!list.remove("1.2.3.4").await.unwrap());
    }

    #[tokio::test]
    async fn list_returns_live_blocks_only() {
        let clock = Arc::new(MockClock::new(1_000));
        let list = blocklist(clock.clone());

        list.add("10.0.0.2", &BlockRecord::new("failed_auth_pattern", 1_000, 900)).await.unwrap();
        list.add("10.0.0.1", &BlockRecord::new("rapid_requests", 1_000, 300)).await.unwrap();
        clock.advance(400);

        let blocked = list.list(clock.now_unix_sec()).await.unwrap();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].0, "10.0.0.2");
        assert_eq!(blocked[0].1.reason, "failed_auth_pattern");
    }
}
