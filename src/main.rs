use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;

use abuse_guard::cloudflare::{CloudflareClient, FirewallRulesManager};
use abuse_guard::config::{Settings, StoreBackend};
use abuse_guard::core::{Clock, RateLimiter, SystemClock};
use abuse_guard::events::EventBus;
use abuse_guard::service::spawn_cleanup;
use abuse_guard::store::{ExpiringStore, MemoryStore, RedisStore, StoreKeys};
use abuse_guard::utils::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;
    tracing::info!("Starting abuse guard service...");

    let settings = Settings::load().context("failed to load configuration")?;
    tracing::info!(
        backend = ?settings.store.backend,
        namespace = %settings.store.namespace,
        "Configuration loaded successfully"
    );

    if settings.metrics.enabled {
        let addr: SocketAddr = settings
            .metrics
            .listen_address
            .parse()
            .context("invalid metrics listen address")?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        tracing::info!(%addr, "Prometheus exporter listening");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn ExpiringStore> = match settings.store.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new(clock.clone())),
        StoreBackend::Redis => Arc::new(
            RedisStore::connect(&settings.redis.url, clock.clone())
                .await
                .context("failed to connect to Redis")?,
        ),
    };

    let events = EventBus::new(settings.events.capacity);
    let limiter = Arc::new(
        RateLimiter::new(store, settings.limits.clone())
            .with_keys(StoreKeys::new(settings.store.namespace.clone()))
            .with_clock(clock.clone())
            .with_event_bus(events.clone()),
    );

    let cleanup = spawn_cleanup(
        limiter.clone(),
        Duration::from_secs(settings.cleanup.interval_seconds.max(1)),
    );

    let firewall = match &settings.cloudflare {
        Some(cloudflare) => {
            let client = CloudflareClient::new(cloudflare)?;
            let manager = Arc::new(FirewallRulesManager::new(Arc::new(client), clock.clone()));
            tracing::info!(
                zone_id = %cloudflare.zone_id,
                "Cloudflare firewall integration enabled"
            );
            Some(manager.spawn(
                events.subscribe(),
                Duration::from_secs(cloudflare.sweep_interval_seconds.max(1)),
            ))
        }
        None => None,
    };

    tracing::info!("Abuse guard service initialized successfully");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutting down abuse guard service");

    cleanup.abort();
    if let Some(firewall) = firewall {
        firewall.abort();
    }

    Ok(())
}
