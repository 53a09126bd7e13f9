use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::cloudflare::client::FirewallApi;
use crate::core::Clock;
use crate::events::{SecurityEvent, SecurityNotification};
use crate::utils::log_firewall_event;

#[derive(Debug, Clone)]
struct ActiveRule {
    rule_id: String,
    expires_at: u64,
}

/// Mirrors temporary IP blocks into firewall rules.
///
/// Listens to the security event bus: a block creates one rule per IP
/// (repeat blocks only extend its expiry), an unblock deletes the rule, and
/// a periodic sweep deletes rules whose block has lapsed in the store.
/// Firewall failures are logged and otherwise ignored.
pub struct FirewallRulesManager {
    api: Arc<dyn FirewallApi>,
    clock: Arc<dyn Clock>,
    /// IP -> rule currently mirroring its block
    ip_rules: RwLock<HashMap<String, ActiveRule>>,
}

impl FirewallRulesManager {
    pub fn new(api: Arc<dyn FirewallApi>, clock: Arc<dyn Clock>) -> Self {
        Self {
            api,
            clock,
            ip_rules: RwLock::new(HashMap::new()),
        }
    }

    /// Rule id mirroring the block on `ip`, if any
    pub async fn rule_for(&self, ip: &str) -> Option<String> {
        self.ip_rules.read().await.get(ip).map(|rule| rule.rule_id.clone())
    }

    pub async fn handle_event(&self, event: &SecurityEvent) {
        match event {
            SecurityEvent::IpBlocked { ip, record } => {
                if let Some(rule) = self.ip_rules.write().await.get_mut(ip) {
                    rule.expires_at = rule.expires_at.max(record.expires_at);
                    return;
                }

                // The API call runs without holding the rule map
                let notes = format!("abuse-guard: {} until {}", record.reason, record.expires_at);
                let rule_id = match self.api.block_ip(ip, &notes).await {
                    Ok(rule_id) => rule_id,
                    Err(e) => {
                        log_firewall_event("block_ip", false, Some(&format!("{}: {}", ip, e)));
                        return;
                    }
                };
                log_firewall_event("block_ip", true, Some(ip));

                let duplicate = {
                    let mut ip_rules = self.ip_rules.write().await;
                    match ip_rules.get_mut(ip) {
                        Some(rule) => {
                            rule.expires_at = rule.expires_at.max(record.expires_at);
                            Some(rule_id)
                        }
                        None => {
                            let expires_at = record.expires_at;
                            ip_rules.insert(ip.clone(), ActiveRule { rule_id, expires_at });
                            None
                        }
                    }
                };
                // Another block for the same IP won the race; keep one rule
                if let Some(rule_id) = duplicate {
                    self.delete_rule(ip, &rule_id).await;
                }
            }
            SecurityEvent::IpUnblocked { ip, .. } => {
                let removed = self.ip_rules.write().await.remove(ip);
                if let Some(rule) = removed {
                    self.delete_rule(ip, &rule.rule_id).await;
                }
            }
        }
    }

    /// Delete rules whose block has expired; returns how many were dropped
    pub async fn sweep_expired(&self) -> usize {
        let now = self.clock.now_unix_sec();
        let expired: Vec<(String, ActiveRule)> = {
            let mut ip_rules = self.ip_rules.write().await;
            let ips: Vec<String> = ip_rules
                .iter()
                .filter(|(_, rule)| rule.expires_at <= now)
                .map(|(ip, _)| ip.clone())
                .collect();
            ips.into_iter()
                .filter_map(|ip| ip_rules.remove(&ip).map(|rule| (ip, rule)))
                .collect()
        };

        for (ip, rule) in &expired {
            self.delete_rule(ip, &rule.rule_id).await;
        }

        expired.len()
    }

    /// Consume bus notifications until the bus closes, sweeping on `sweep_interval`
    pub fn spawn(
        self: Arc<Self>,
        mut events: broadcast::Receiver<SecurityNotification>,
        sweep_interval: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut sweep = tokio::time::interval(sweep_interval);
            loop {
                tokio::select! {
                    received = events.recv() => match received {
                        Ok(notification) => self.handle_event(&notification.event).await,
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(
                                skipped,
                                "Firewall listener lagged behind security events"
                            );
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = sweep.tick() => {
                        self.sweep_expired().await;
                    }
                }
            }
            tracing::info!("Firewall listener stopped");
        })
    }

    async fn delete_rule(&self, ip: &str, rule_id: &str) {
        match self.api.delete_rule(rule_id).await {
            Ok(()) => log_firewall_event("unblock_ip", true, Some(ip)),
            Err(e) => {
                log_firewall_event("unblock_ip", false, Some(&format!("{}: {}", ip, e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudflare::client::MockFirewallApi;
    use crate::core::{BlockRecord, MockClock};
    use crate::events::EventBus;
    use crate::utils::{GuardError, GuardResult};
    use async_trait::async_trait;
    use tokio::sync::Notify;

    /// Firewall whose `block_ip` waits until released
    struct HeldFirewall {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl FirewallApi for HeldFirewall {
        async fn block_ip(&self, _ip: &str, _notes: &str) -> GuardResult<String> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok("held".to_string())
        }

        async fn delete_rule(&self, _rule_id: &str) -> GuardResult<()> {
            Ok(())
        }
    }

    fn blocked(ip: &str, blocked_at: u64, duration: u64) -> SecurityEvent {
        SecurityEvent::IpBlocked {
            ip: ip.to_string(),
            record: BlockRecord::new("rapid_requests", blocked_at, duration),
        }
    }

    fn unblocked(ip: &str) -> SecurityEvent {
        SecurityEvent::IpUnblocked {
            ip: ip.to_string(),
            actor: "admin".to_string(),
        }
    }

    #[tokio::test]
    async fn repeat_blocks_reuse_the_rule() {
        let mut api = MockFirewallApi::new();
        api.expect_block_ip()
            .times(1)
            .returning(|_, _| Ok("rule-1".to_string()));
        api.expect_delete_rule()
            .withf(|rule_id| rule_id == "rule-1")
            .times(1)
            .returning(|_| Ok(()));
        let manager = FirewallRulesManager::new(Arc::new(api), Arc::new(MockClock::new(1_000)));

        manager.handle_event(&blocked("1.2.3.4", 1_000, 300)).await;
        manager.handle_event(&blocked("1.2.3.4", 1_010, 300)).await;
        assert_eq!(manager.rule_for("1.2.3.4").await.as_deref(), Some("rule-1"));

        manager.handle_event(&unblocked("1.2.3.4")).await;
        assert_eq!(manager.rule_for("1.2.3.4").await, None);
    }

    #[tokio::test]
    async fn unblock_without_rule_is_ignored() {
        // No expectations: any API call panics
        let manager = FirewallRulesManager::new(
            Arc::new(MockFirewallApi::new()),
            Arc::new(MockClock::new(1_000)),
        );
        manager.handle_event(&unblocked("1.2.3.4")).await;
    }

    #[tokio::test]
    async fn failed_block_is_swallowed() {
        let mut api = MockFirewallApi::new();
        api.expect_block_ip()
            .times(1)
            .returning(|_, _| Err(GuardError::Firewall("zone locked".to_string())));
        let manager = FirewallRulesManager::new(Arc::new(api), Arc::new(MockClock::new(1_000)));

        manager.handle_event(&blocked("1.2.3.4", 1_000, 300)).await;
        assert_eq!(manager.rule_for("1.2.3.4").await, None);
    }

    #[tokio::test]
    async fn sweep_drops_lapsed_rules() {
        let clock = Arc::new(MockClock::new(1_000));
        let mut api = MockFirewallApi::new();
        api.expect_block_ip()
            .withf(|ip, _| ip == "1.2.3.4")
            .returning(|_, _| Ok("short".to_string()));
        api.expect_block_ip()
            .withf(|ip, _| ip == "5.6.7.8")
            .returning(|_, _| Ok("long".to_string()));
        api.expect_delete_rule()
            .withf(|rule_id| rule_id == "short")
            .times(1)
            .returning(|_| Ok(()));
        let manager = FirewallRulesManager::new(Arc::new(api), clock.clone());

        manager.handle_event(&blocked("1.2.3.4", 1_000, 300)).await;
        manager.handle_event(&blocked("5.6.7.8", 1_000, 900)).await;

        clock.advance(300);
        assert_eq!(manager.sweep_expired().await, 1);
        assert_eq!(manager.rule_for("1.2.3.4").await, None);
        assert_eq!(manager.rule_for("5.6.7.8").await.as_deref(), Some("long"));
    }

    #[tokio::test]
    async fn spawned_listener_follows_the_bus() {
        let mut api = MockFirewallApi::new();
        api.expect_block_ip().returning(|_, _| Ok("rule-9".to_string()));
        let manager = Arc::new(FirewallRulesManager::new(
            Arc::new(api),
            Arc::new(MockClock::new(1_000)),
        ));
        let bus = EventBus::new(8);

        let handle = manager.clone().spawn(bus.subscribe(), Duration::from_secs(3600));
        bus.publish(blocked("1.2.3.4", 1_000, 300));
        drop(bus);
        handle.await.unwrap();

        assert_eq!(manager.rule_for("1.2.3.4").await.as_deref(), Some("rule-9"));
    }

    #[tokio::test]
    async fn rule_map_stays_readable_during_block_call() {
        let api = Arc::new(HeldFirewall {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let clock = Arc::new(MockClock::new(1_000));
        let manager = Arc::new(FirewallRulesManager::new(api.clone(), clock));

        let pending = tokio::spawn({
            let manager = manager.clone();
            async move { manager.handle_event(&blocked("1.2.3.4", 1_000, 300)).await }
        });
        api.entered.notified().await;

        let lookup =
            tokio::time::timeout(Duration::from_secs(1), manager.rule_for("5.6.7.8")).await;
        assert_eq!(lookup.unwrap(), None);

        api.release.notify_one();
        pending.await.unwrap();
        assert_eq!(manager.rule_for("1.2.3.4").await.as_deref(), Some("held"));
    }
}
