use std::collections::HashMap;

use serde::{Deserialize, Deserializer};

/// Action types with a configured IP rate limit
pub mod actions {
    pub const ENDPOINT_ACCESS: &str = "endpoint_access";
    pub const AUTH_ATTEMPT: &str = "auth_attempt";
    pub const CONNECTION_ATTEMPT: &str = "connection_attempt";
}

/// Abuse pattern types with a configured escalation threshold
pub mod patterns {
    pub const RAPID_REQUESTS: &str = "rapid_requests";
    pub const FAILED_AUTH_PATTERN: &str = "failed_auth_pattern";
    pub const TOPIC_SCANNING: &str = "topic_scanning";
}

/// Configuration settings for the abuse guard service
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Expiring store selection
    pub store: StoreConfig,
    /// Redis configuration
    pub redis: RedisConfig,
    /// Rate limit and abuse threshold tables
    pub limits: RateLimitConfig,
    /// Scheduled cleanup
    pub cleanup: CleanupConfig,
    /// Security event bus
    pub events: EventsConfig,
    /// Prometheus exporter
    pub metrics: MetricsConfig,
    /// Cloudflare firewall integration, disabled when absent
    pub cloudflare: Option<CloudflareConfig>,
}

/// Which store backend holds the limiter's records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Leading segment of every store key
    pub namespace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            namespace: "abuse_guard".to_string(),
        }
    }
}

/// Redis configuration settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
        }
    }
}

/// Sliding-window limit for one action type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateLimitRule {
    /// Maximum number of attempts allowed per period
    pub max_requests: u32,
    /// Window length in seconds
    pub period_seconds: u64,
}

impl RateLimitRule {
    pub const fn new(max_requests: u32, period_seconds: u64) -> Self {
        Self {
            max_requests,
            period_seconds,
        }
    }
}

/// Escalation threshold for one abuse pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AbuseThreshold {
    /// Incidents within the period that trigger a temporary block
    pub max_incidents: u32,
    /// Window length in seconds
    pub period_seconds: u64,
    /// How long the resulting block lasts
    pub block_duration_seconds: u64,
}

impl AbuseThreshold {
    pub const fn new(max_incidents: u32, period_seconds: u64, block_duration_seconds: u64) -> Self {
        Self {
            max_incidents,
            period_seconds,
            block_duration_seconds,
        }
    }
}

/// Rate limiting configuration settings.
///
/// Configured tables are merged over the defaults: a configured entry
/// replaces only the fields it names, and untouched defaults stay in place.
/// Entries for action or pattern types without a default must name every
/// field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Action type -> limit
    pub ip_limits: HashMap<String, RateLimitRule>,
    /// Pattern type -> threshold
    pub abuse_thresholds: HashMap<String, AbuseThreshold>,
    /// Block length for reasons without a threshold entry
    pub default_block_duration_seconds: u64,
}

impl RateLimitConfig {
    pub fn ip_limit(&self, action_type: &str) -> Option<&RateLimitRule> {
        self.ip_limits.get(action_type)
    }

    pub fn abuse_threshold(&self, pattern_type: &str) -> Option<&AbuseThreshold> {
        self.abuse_thresholds.get(pattern_type)
    }

    /// Block duration for `reason`, falling back to the default
    pub fn block_duration(&self, reason: &str) -> u64 {
        self.abuse_threshold(reason)
            .map(|threshold| threshold.block_duration_seconds)
            .unwrap_or(self.default_block_duration_seconds)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let ip_limits = HashMap::from([
            (actions::ENDPOINT_ACCESS.to_string(), RateLimitRule::new(25, 60)),
            (actions::AUTH_ATTEMPT.to_string(), RateLimitRule::new(5, 300)),
            (actions::CONNECTION_ATTEMPT.to_string(), RateLimitRule::new(10, 60)),
        ]);
        let abuse_thresholds = HashMap::from([
            (patterns::RAPID_REQUESTS.to_string(), AbuseThreshold::new(50, 60, 300)),
            (patterns::FAILED_AUTH_PATTERN.to_string(), AbuseThreshold::new(5, 300, 900)),
            (patterns::TOPIC_SCANNING.to_string(), AbuseThreshold::new(20, 300, 600)),
        ]);

        Self {
            ip_limits,
            abuse_thresholds,
            default_block_duration_seconds: 300,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RuleOverride {
    max_requests: Option<u32>,
    period_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ThresholdOverride {
    max_incidents: Option<u32>,
    period_seconds: Option<u64>,
    block_duration_seconds: Option<u64>,
}

/// Raw `limits` section as written in configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RateLimitOverrides {
    ip_limits: HashMap<String, RuleOverride>,
    abuse_thresholds: HashMap<String, ThresholdOverride>,
    default_block_duration_seconds: Option<u64>,
}

fn missing_field(table: &str, key: &str, field: &str) -> String {
    format!("limits.{}.{}: missing field `{}`", table, key, field)
}

impl RateLimitOverrides {
    fn merge_over_defaults(self) -> Result<RateLimitConfig, String> {
        let mut config = RateLimitConfig::default();

        for (action, entry) in self.ip_limits {
            let base = config.ip_limits.get(&action).copied();
            let rule = RateLimitRule {
                max_requests: entry
                    .max_requests
                    .or(base.map(|b| b.max_requests))
                    .ok_or_else(|| missing_field("ip_limits", &action, "max_requests"))?,
                period_seconds: entry
                    .period_seconds
                    .or(base.map(|b| b.period_seconds))
                    .ok_or_else(|| missing_field("ip_limits", &action, "period_seconds"))?,
            };
            config.ip_limits.insert(action, rule);
        }

        for (pattern, entry) in self.abuse_thresholds {
            let base = config.abuse_thresholds.get(&pattern).copied();
            let threshold = AbuseThreshold {
                max_incidents: entry
                    .max_incidents
                    .or(base.map(|b| b.max_incidents))
                    .ok_or_else(|| missing_field("abuse_thresholds", &pattern, "max_incidents"))?,
                period_seconds: entry
                    .period_seconds
                    .or(base.map(|b| b.period_seconds))
                    .ok_or_else(|| missing_field("abuse_thresholds", &pattern, "period_seconds"))?,
                block_duration_seconds: entry
                    .block_duration_seconds
                    .or(base.map(|b| b.block_duration_seconds))
                    .ok_or_else(|| {
                        missing_field("abuse_thresholds", &pattern, "block_duration_seconds")
                    })?,
            };
            config.abuse_thresholds.insert(pattern, threshold);
        }

        if let Some(duration) = self.default_block_duration_seconds {
            config.default_block_duration_seconds = duration;
        }

        Ok(config)
    }
}

impl<'de> Deserialize<'de> for RateLimitConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        RateLimitOverrides::deserialize(deserializer)?
            .merge_over_defaults()
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Seconds between scheduled cleanup runs
    pub interval_seconds: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Broadcast buffer; slow listeners lag past this many events
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Address the Prometheus scrape endpoint binds to
    pub listen_address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_address: "0.0.0.0:9000".to_string(),
        }
    }
}

/// Cloudflare-specific configuration settings
#[derive(Debug, Clone, Deserialize)]
pub struct CloudflareConfig {
    /// Cloudflare API token for authentication
    pub api_token: String,
    /// Cloudflare Zone ID for the protected domain
    pub zone_id: String,
    /// Seconds between sweeps for rules whose block has expired
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

fn default_sweep_interval() -> u64 {
    60
}

impl Settings {
    /// Load configuration from an optional config file and `APP__*` environment variables
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/abuse-guard").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
