//! Expiring key-value stores backing the rate limiter.
//!
//! Every record the limiter keeps (attempt logs, abuse incident logs and
//! block records) is a string payload stored under a string key with a TTL.
//! Backends may evict lazily; `scan_prefix` reports the expiry of each entry
//! so that the scheduled cleanup can purge what the backend left behind.
//!
//! ## Key patterns
//!
//! ```text
//! {ns}_rate_limit_{action}_{ip}      → JSON array of attempt timestamps
//! {ns}_abuse_{pattern}_{ip}          → JSON array of incident timestamps
//! {ns}_request_freq_{sha256(endpoint)}_{ip}  → JSON array of request timestamps
//! {ns}_blocked_ip_{ip}               → BlockRecord JSON
//! ```

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors raised by store backends
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A key found by a prefix scan, with its absolute expiry if it has one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub key: String,
    pub expires_at: Option<u64>,
}

impl StoredEntry {
    /// Whether the entry's TTL has elapsed at `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.map_or(false, |expires_at| expires_at <= now)
    }
}

/// Generic expiring key-value store.
#[async_trait]
pub trait ExpiringStore: Send + Sync {
    /// Returns the payload under `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Stores `value` under `key` for `ttl_seconds`.
    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> StoreResult<()>;

    /// Removes `key`, returning whether anything was stored under it.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Lists every key starting with `prefix`, expired or not.
    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<StoredEntry>>;
}

/// Builds the store keys for one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreKeys {
    namespace: String,
}

impl StoreKeys {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Prefix shared by every key of the namespace.
    pub fn prefix(&self) -> String {
        format!("{}_", self.namespace)
    }

    pub fn attempts(&self, action_type: &str, ip: &str) -> String {
        format!("{}_rate_limit_{}_{}", self.namespace, action_type, ip)
    }

    pub fn abuse(&self, pattern_type: &str, ip: &str) -> String {
        format!("{}_abuse_{}_{}", self.namespace, pattern_type, ip)
    }

    pub fn request_frequency(&self, endpoint: &str, ip: &str) -> String {
        format!(
            "{}_request_freq_{}_{}",
            self.namespace,
            endpoint_digest(endpoint),
            ip
        )
    }

    pub fn block_prefix(&self) -> String {
        format!("{}_blocked_ip_", self.namespace)
    }

    pub fn block(&self, ip: &str) -> String {
        format!("{}{}", self.block_prefix(), ip)
    }
}

impl Default for StoreKeys {
    fn default() -> Self {
        Self::new("abuse_guard")
    }
}

// Hex SHA-256 of the raw endpoint: fixed length, distinct endpoints stay distinct
fn endpoint_digest(endpoint: &str) -> String {
    hex::encode(Sha256::digest(endpoint.as_bytes()))
}
