use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;

use crate::config::{patterns, RateLimitConfig};
use crate::events::{EventBus, SecurityEvent};
use crate::store::{ExpiringStore, StoreKeys};
use crate::utils::{log_rate_limit, SecurityLog, SecurityLogEntry, Severity, TracingSecurityLog};

use super::clock::{Clock, SystemClock};
use super::ip_blocklist::{BlockRecord, IpBlocklist};
use super::window::AttemptLog;

/// Window of the fixed per-endpoint request frequency check
pub const REQUEST_FREQUENCY_WINDOW_SECONDS: u64 = 60;
/// Requests per endpoint within the window before `rapid_requests` is recorded
pub const REQUEST_FREQUENCY_THRESHOLD: usize = 30;

/// Per-user limiter consulted by [`RateLimiter::get_remaining_quota`]
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRateGate: Send + Sync {
    async fn is_user_rate_limited(&self, user_id: u64, action_type: &str) -> bool;
}

/// Sliding-window rate limiter with abuse escalation and temporary IP blocks.
///
/// All state lives in the expiring store, so one instance can be shared
/// across every request handler. Nothing here returns an error: store
/// failures are logged and the limiter answers as if nothing was recorded.
pub struct RateLimiter {
    store: Arc<dyn ExpiringStore>,
    keys: StoreKeys,
    config: RateLimitConfig,
    blocklist: IpBlocklist,
    clock: Arc<dyn Clock>,
    security_log: Arc<dyn SecurityLog>,
    events: EventBus,
    user_gate: Option<Arc<dyn UserRateGate>>,
}

impl RateLimiter {
    /// Create a limiter over `store` with the wall clock, a tracing
    /// security log and a private event bus
    pub fn new(store: Arc<dyn ExpiringStore>, config: RateLimitConfig) -> Self {
        let keys = StoreKeys::default();
        Self {
            blocklist: IpBlocklist::new(store.clone(), keys.clone()),
            store,
            keys,
            config,
            clock: Arc::new(SystemClock),
            security_log: Arc::new(TracingSecurityLog),
            events: EventBus::default(),
            user_gate: None,
        }
    }

    /// Use `keys` for every store key, including block records
    pub fn with_keys(mut self, keys: StoreKeys) -> Self {
        self.blocklist = IpBlocklist::new(self.store.clone(), keys.clone());
        self.keys = keys;
        self
    }

    /// Replace the wall clock, e.g. with a `MockClock` in tests
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Send security log entries to `security_log` instead of `tracing`
    pub fn with_security_log(mut self, security_log: Arc<dyn SecurityLog>) -> Self {
        self.security_log = security_log;
        self
    }

    /// Publish block and unblock notifications on a shared bus
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_user_gate(mut self, user_gate: Arc<dyn UserRateGate>) -> Self {
        self.user_gate = Some(user_gate);
        self
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Whether `ip` has used up its allowance for `action_type`.
    ///
    /// Unknown action types are never limited.
    pub async fn is_rate_limited(&self, ip: &str, action_type: &str) -> bool {
        let Some(rule) = self.config.ip_limit(action_type) else {
            return false;
        };

        let now = self.clock.now_unix_sec();
        let log = self
            .load_log(&self.keys.attempts(action_type, ip))
            .await
            .pruned(now, rule.period_seconds);

        let limited = log.len() >= rule.max_requests as usize;
        log_rate_limit(ip, action_type, log.len(), limited);
        if limited {
            metrics::increment_counter!(
                "abuse_guard_rate_limited_total",
                "action" => action_type.to_string()
            );
        }

        limited
    }

    /// Append an attempt for `ip` and `action_type`; unknown actions are ignored
    pub async fn record_action(&self, ip: &str, action_type: &str) {
        let Some(rule) = self.config.ip_limit(action_type) else {
            tracing::debug!(
                ip = %ip,
                action_type = %action_type,
                "Ignoring unconfigured action type"
            );
            return;
        };

        let key = self.keys.attempts(action_type, ip);
        self.append(&key, rule.period_seconds).await;
    }

    /// Whether `ip` has reached the incident threshold for `pattern_type`
    pub async fn detect_abuse_pattern(&self, ip: &str, pattern_type: &str) -> bool {
        let Some(threshold) = self.config.abuse_threshold(pattern_type) else {
            return false;
        };

        let now = self.clock.now_unix_sec();
        let log = self
            .load_log(&self.keys.abuse(pattern_type, ip))
            .await
            .pruned(now, threshold.period_seconds);

        log.len() >= threshold.max_incidents as usize
    }

    /// Record one abuse incident and block the IP once the threshold is reached
    pub async fn record_abuse_incident(
        &self,
        ip: &str,
        pattern_type: &str,
        context: serde_json::Value,
    ) {
        let Some(threshold) = self.config.abuse_threshold(pattern_type).copied() else {
            tracing::debug!(
                ip = %ip,
                pattern_type = %pattern_type,
                "Ignoring unconfigured abuse pattern"
            );
            return;
        };

        let key = self.keys.abuse(pattern_type, ip);
        let count = self.append(&key, threshold.period_seconds).await;

        self.security_log.record(SecurityLogEntry::warning(
            format!("Abuse pattern detected: {}", pattern_type),
            "abuse_detected",
            json!({
                "ip": ip,
                "pattern_type": pattern_type,
                "incident_count": count,
                "threshold": threshold.max_incidents,
                "context": context,
            }),
        ));
        metrics::increment_counter!(
            "abuse_guard_abuse_incidents_total",
            "pattern" => pattern_type.to_string()
        );

        if count >= threshold.max_incidents as usize {
            self.initiate_temporary_block(ip, pattern_type).await;
        }
    }

    /// Whether `ip` holds an unexpired block. Store failures read as not blocked.
    pub async fn is_ip_blocked(&self, ip: &str) -> bool {
        match self.blocklist.is_blocked(ip).await {
            Ok(blocked) => blocked,
            Err(e) => {
                tracing::warn!(
                    ip = %ip,
                    error = %e,
                    "Block lookup failed, treating IP as not blocked"
                );
                false
            }
        }
    }

    /// Block `ip` for the duration configured for `reason` and notify listeners
    pub async fn initiate_temporary_block(&self, ip: &str, reason: &str) -> BlockRecord {
        let duration = self.config.block_duration(reason);
        let record = BlockRecord::new(reason, self.clock.now_unix_sec(), duration);

        if let Err(e) = self.blocklist.add(ip, &record).await {
            tracing::warn!(
                ip = %ip,
                reason = %reason,
                error = %e,
                "Failed to persist block record"
            );
        }

        self.security_log.record(SecurityLogEntry::warning(
            format!("IP {} temporarily blocked for {} seconds", ip, duration),
            "ip_blocked",
            json!({
                "ip": ip,
                "reason": reason,
                "duration": duration,
                "expires_at": record.expires_at,
            }),
        ));
        metrics::increment_counter!("abuse_guard_blocks_total", "reason" => reason.to_string());

        self.events.publish(SecurityEvent::IpBlocked {
            ip: ip.to_string(),
            record: record.clone(),
        });

        record
    }

    /// The block record for `ip`, if one is still live
    pub async fn get_ip_block_info(&self, ip: &str) -> Option<BlockRecord> {
        match self.blocklist.get(ip).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(ip = %ip, error = %e, "Failed to read block record");
                None
            }
        }
    }

    /// Lift a block on behalf of `actor`; false if the IP was not blocked
    pub async fn unblock_ip(&self, ip: &str, actor: &str) -> bool {
        match self.blocklist.remove(ip).await {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                tracing::warn!(ip = %ip, error = %e, "Failed to remove block record");
                return false;
            }
        }

        self.security_log.record(SecurityLogEntry::warning(
            format!("IP {} manually unblocked", ip),
            "ip_unblocked",
            json!({ "ip": ip, "unblocked_by": actor }),
        ));
        metrics::increment_counter!("abuse_guard_unblocks_total");

        self.events.publish(SecurityEvent::IpUnblocked {
            ip: ip.to_string(),
            actor: actor.to_string(),
        });

        true
    }

    /// Count a request to `endpoint` and flag rapid requests.
    ///
    /// Always records, then returns true once more than
    /// [`REQUEST_FREQUENCY_THRESHOLD`] requests fall in the trailing minute,
    /// recording a `rapid_requests` incident at the same time.
    pub async fn check_request_frequency(&self, ip: &str, endpoint: &str) -> bool {
        let key = self.keys.request_frequency(endpoint, ip);
        let count = self.append(&key, REQUEST_FREQUENCY_WINDOW_SECONDS).await;

        if count <= REQUEST_FREQUENCY_THRESHOLD {
            return false;
        }

        self.record_abuse_incident(
            ip,
            patterns::RAPID_REQUESTS,
            json!({ "endpoint": endpoint, "request_count": count }),
        )
        .await;

        true
    }

    /// Delete every record in the namespace whose TTL has elapsed.
    ///
    /// Returns the number removed. Errors are logged, never propagated.
    pub async fn cleanup_expired_records(&self) -> usize {
        let now = self.clock.now_unix_sec();
        let entries = match self.store.scan_prefix(&self.keys.prefix()).await {
            Ok(entries) => entries,
            Err(e) => {
                self.log_cleanup_error(&e.to_string(), None);
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.iter().filter(|entry| entry.is_expired(now)) {
            match self.store.delete(&entry.key).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => self.log_cleanup_error(&e.to_string(), Some(&entry.key)),
            }
        }

        if removed > 0 {
            self.security_log.record(SecurityLogEntry::new(
                Severity::Info,
                format!("Cleaned up {} expired rate limit records", removed),
                "cleanup",
                json!({ "removed": removed }),
            ));
            metrics::counter!("abuse_guard_cleanup_removed_total", removed as u64);
        }

        removed
    }

    /// Coarse quota for a user: -1 when not limited, 0 when limited.
    ///
    /// Without a configured [`UserRateGate`] every user is unlimited.
    pub async fn get_remaining_quota(&self, user_id: u64, action_type: &str) -> i64 {
        match &self.user_gate {
            Some(gate) if gate.is_user_rate_limited(user_id, action_type).await => 0,
            _ => -1,
        }
    }

    /// Current window usage for `ip` and `action_type`
    pub async fn get_rate_limit_status(
        &self,
        ip: &str,
        action_type: &str,
    ) -> Option<RateLimitStatus> {
        let rule = self.config.ip_limit(action_type)?;
        let now = self.clock.now_unix_sec();
        let log = self
            .load_log(&self.keys.attempts(action_type, ip))
            .await
            .pruned(now, rule.period_seconds);

        let count = log.len() as u32;
        Some(RateLimitStatus {
            ip: ip.to_string(),
            action_type: action_type.to_string(),
            count,
            limit: rule.max_requests,
            remaining: rule.max_requests.saturating_sub(count),
            reset_at: log.oldest().map(|oldest| oldest + rule.period_seconds),
        })
    }

    /// Reset rate limit for an IP (useful for manual intervention)
    pub async fn reset_rate_limit(&self, ip: &str, action_type: &str) -> bool {
        match self.store.delete(&self.keys.attempts(action_type, ip)).await {
            Ok(existed) => existed,
            Err(e) => {
                tracing::warn!(
                    ip = %ip,
                    action_type = %action_type,
                    error = %e,
                    "Failed to reset rate limit"
                );
                false
            }
        }
    }

    /// Every IP currently holding a block
    pub async fn list_blocked_ips(&self) -> Vec<(String, BlockRecord)> {
        match self.blocklist.list(self.clock.now_unix_sec()).await {
            Ok(blocked) => blocked,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list blocked IPs");
                Vec::new()
            }
        }
    }

    async fn load_log(&self, key: &str) -> AttemptLog {
        let payload = match self.store.get(key).await {
            Ok(Some(payload)) => payload,
            Ok(None) => return AttemptLog::default(),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to load attempt log");
                return AttemptLog::default();
            }
        };

        AttemptLog::decode(&payload).unwrap_or_else(|e| {
            tracing::warn!(key = %key, error = %e, "Discarding malformed attempt log");
            AttemptLog::default()
        })
    }

    // Read, append now, prune and persist with TTL = window. Returns the pruned count.
    async fn append(&self, key: &str, window: u64) -> usize {
        let now = self.clock.now_unix_sec();
        let mut log = self.load_log(key).await;
        log.record(now);
        log.prune(now, window);

        let persisted = match log.encode() {
            Ok(payload) => self.store.set(key, &payload, window).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = persisted {
            tracing::warn!(key = %key, error = %e, "Failed to persist attempt log");
        }

        log.len()
    }

    fn log_cleanup_error(&self, error: &str, key: Option<&str>) {
        self.security_log.record(SecurityLogEntry::new(
            Severity::Error,
            "Rate limit cleanup failed",
            "cleanup_error",
            json!({ "error": error, "key": key }),
        ));
    }
}

/// Status information for one IP and action type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub ip: String,
    pub action_type: String,
    /// Attempts within the current window
    pub count: u32,
    pub limit: u32,
    pub remaining: u32,
    /// When the oldest counted attempt leaves the window
    pub reset_at: Option<u64>,
}
