//! Time source for window evaluation and store expiry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current Unix timestamp in seconds.
pub trait Clock: Send + Sync {
    fn now_unix_sec(&self) -> u64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix_sec(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Manually driven clock for deterministic tests of time windows.
#[derive(Debug, Default)]
pub struct MockClock {
    timestamp: AtomicU64,
}

impl MockClock {
    pub fn new(timestamp: u64) -> Self {
        Self {
            timestamp: AtomicU64::new(timestamp),
        }
    }

    pub fn set(&self, timestamp: u64) {
        self.timestamp.store(timestamp, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: u64) {
        self.timestamp.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now_unix_sec(&self) -> u64 {
        self.timestamp.load(Ordering::SeqCst)
    }
}
