#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use abuse_guard::config::RateLimitConfig;
use abuse_guard::core::{MockClock, RateLimiter};
use abuse_guard::events::EventBus;
use abuse_guard::store::MemoryStore;
use abuse_guard::utils::{SecurityLog, SecurityLogEntry};

/// Arbitrary fixed start time for window arithmetic
pub const T0: u64 = 1_700_000_000;

/// Generate a random IP address for testing
pub fn random_ip() -> String {
    format!(
        "{}.{}.{}.{}",
        rand::random::<u8>(),
        rand::random::<u8>(),
        rand::random::<u8>(),
        rand::random::<u8>()
    )
}

/// Security log that keeps every entry for inspection
#[derive(Default)]
pub struct RecordingLog {
    entries: Mutex<Vec<SecurityLogEntry>>,
}

impl RecordingLog {
    pub fn entries(&self) -> Vec<SecurityLogEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn categories(&self) -> Vec<String> {
        self.entries().into_iter().map(|entry| entry.category).collect()
    }

    pub fn count(&self, category: &str) -> usize {
        self.entries().iter().filter(|entry| entry.category == category).count()
    }
}

impl SecurityLog for RecordingLog {
    fn record(&self, entry: SecurityLogEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}

/// A limiter over an in-memory store with a controllable clock
pub struct Harness {
    pub clock: Arc<MockClock>,
    pub store: Arc<MemoryStore>,
    pub log: Arc<RecordingLog>,
    pub events: EventBus,
    pub limiter: RateLimiter,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(RateLimitConfig::default())
    }

    pub fn with_config(config: RateLimitConfig) -> Self {
        let clock = Arc::new(MockClock::new(T0));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let log = Arc::new(RecordingLog::default());
        let events = EventBus::new(64);
        let limiter = RateLimiter::new(store.clone(), config)
            .with_clock(clock.clone())
            .with_security_log(log.clone())
            .with_event_bus(events.clone());

        Self {
            clock,
            store,
            log,
            events,
            limiter,
        }
    }
}
