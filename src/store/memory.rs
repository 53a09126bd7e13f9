use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ExpiringStore, StoreResult, StoredEntry};
use crate::core::Clock;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: u64,
}

/// In-process expiring store.
///
/// Expired entries are hidden from `get` but are only removed by `delete`,
/// the same lazy eviction a host cache gives you. The scheduled cleanup is
/// what actually reclaims them.
pub struct MemoryStore {
    entries: RwLock<HashMap<String, MemoryEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Number of entries held, including expired ones not yet purged.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ExpiringStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = self.clock.now_unix_sec();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> StoreResult<()> {
        let expires_at = self.clock.now_unix_sec().saturating_add(ttl_seconds);
        self.entries.write().await.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<StoredEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| StoredEntry {
                key: key.clone(),
                expires_at: Some(entry.expires_at),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MockClock;

    fn store_at(now: u64) -> (Arc<MockClock>, MemoryStore) {
        let clock = Arc::new(MockClock::new(now));
        let store = MemoryStore::new(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn get_hides_expired_entries_without_evicting() {
        let (clock, store) = store_at(1_000);
        store.set("k", "v", 60).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        clock.advance(60);
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let (_clock, store) = store_at(1_000);
        store.set("k", "v", 60).await.unwrap();
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn scan_prefix_reports_expiry() {
        let (_clock, store) = store_at(1_000);
        store.set("ns_a", "1", 10).await.unwrap();
        store.set("ns_b", "2", 20).await.unwrap();
        store.set("other", "3", 30).await.unwrap();

        let mut entries = store.scan_prefix("ns_").await.unwrap();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(
            entries,
            vec![
                StoredEntry { key: "ns_a".to_string(), expires_at: Some(1_010) },
                StoredEntry { key: "ns_b".to_string(), expires_at: Some(1_020) },
            ]
        );
    }
}
