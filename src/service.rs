use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::core::{BlockRecord, RateLimiter};
use crate::utils::{create_request_span, GuardError, GuardResult};

/// Request-path entry point in front of the [`RateLimiter`]
#[derive(Clone)]
pub struct GuardService {
    limiter: Arc<RateLimiter>,
}

impl GuardService {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Processes a request from an IP address
    ///
    /// Rejects blocked IPs, then counts the request against the endpoint
    /// frequency check and the action's rate limit. An allowed request is
    /// recorded against `action_type`.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If the request is allowed
    /// * `Err(GuardError::IpBlocked)` - If the IP holds a temporary block
    /// * `Err(GuardError::RateLimitExceeded)` - If the request is over a limit
    pub async fn process_request(
        &self,
        ip: &str,
        action_type: &str,
        endpoint: &str,
    ) -> GuardResult<()> {
        let limiter = &self.limiter;
        async move {
            if limiter.is_ip_blocked(ip).await {
                let detail = match limiter.get_ip_block_info(ip).await {
                    Some(record) => {
                        format!("{} ({} until {})", ip, record.reason, record.expires_at)
                    }
                    None => ip.to_string(),
                };
                return Err(GuardError::IpBlocked(detail));
            }

            if limiter.check_request_frequency(ip, endpoint).await {
                return Err(GuardError::RateLimitExceeded(format!(
                    "{} sent too many requests to {}",
                    ip, endpoint
                )));
            }

            if limiter.is_rate_limited(ip, action_type).await {
                return Err(GuardError::RateLimitExceeded(format!("{} on {}", ip, action_type)));
            }

            limiter.record_action(ip, action_type).await;
            Ok(())
        }
        .instrument(create_request_span(ip, action_type))
        .await
    }

    /// Report suspicious behavior seen by a handler
    pub async fn report_abuse(&self, ip: &str, pattern_type: &str, context: serde_json::Value) {
        self.limiter.record_abuse_incident(ip, pattern_type, context).await;
    }

    pub async fn blocked_ips(&self) -> Vec<(String, BlockRecord)> {
        self.limiter.list_blocked_ips().await
    }

    pub async fn unblock(&self, ip: &str, actor: &str) -> bool {
        self.limiter.unblock_ip(ip, actor).await
    }
}

/// Run `cleanup_expired_records` every `interval` until the task is aborted
pub fn spawn_cleanup(limiter: Arc<RateLimiter>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = limiter.cleanup_expired_records().await;
            tracing::debug!(removed, "Scheduled cleanup finished");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{actions, RateLimitConfig};
    use crate::core::{MockClock, REQUEST_FREQUENCY_THRESHOLD};
    use crate::store::MemoryStore;

    fn service() -> (Arc<MockClock>, GuardService) {
        let clock = Arc::new(MockClock::new(1_700_000_000));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let limiter = RateLimiter::new(store, RateLimitConfig::default()).with_clock(clock.clone());
        (clock, GuardService::new(Arc::new(limiter)))
    }

    #[tokio::test]
    async fn allowed_requests_are_recorded_until_the_limit() {
        let (_clock, service) = service();
        for _ in 0..5 {
            tokio_test::assert_ok!(
                service.process_request("1.2.3.4", actions::AUTH_ATTEMPT, "/login").await
            );
        }

        let result = service.process_request("1.2.3.4", actions::AUTH_ATTEMPT, "/login").await;
        assert!(matches!(result, Err(GuardError::RateLimitExceeded(_))));
    }

    #[tokio::test]
    async fn blocked_ips_are_rejected_first() {
        let (_clock, service) = service();
        service.limiter().initiate_temporary_block("1.2.3.4", "topic_scanning").await;

        let result = service.process_request("1.2.3.4", actions::ENDPOINT_ACCESS, "/sse").await;
        match result {
            Err(GuardError::IpBlocked(detail)) => assert!(detail.contains("topic_scanning")),
            other => panic!("expected a block, got {:?}", other),
        }

        assert_eq!(service.blocked_ips().await.len(), 1);
        assert!(service.unblock("1.2.3.4", "admin").await);
        tokio_test::assert_ok!(
            service.process_request("1.2.3.4", actions::ENDPOINT_ACCESS, "/sse").await
        );
    }

    #[tokio::test]
    async fn endpoint_floods_trip_the_frequency_check() {
        let (_clock, service) = service();
        // Unconfigured action: only the frequency check applies
        for _ in 0..REQUEST_FREQUENCY_THRESHOLD {
            tokio_test::assert_ok!(service.process_request("1.2.3.4", "poll", "/events").await);
        }

        let result = service.process_request("1.2.3.4", "poll", "/events").await;
        assert!(matches!(result, Err(GuardError::RateLimitExceeded(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_cleanup_purges_expired_records() {
        let (clock, service) = service();
        let limiter = service.limiter().clone();
        limiter.record_action("1.2.3.4", actions::ENDPOINT_ACCESS).await;
        clock.advance(120);

        let handle = spawn_cleanup(limiter.clone(), Duration::from_secs(3600));
        tokio::time::sleep(Duration::from_secs(3601)).await;

        assert_eq!(limiter.cleanup_expired_records().await, 0);
        handle.abort();
    }
}
