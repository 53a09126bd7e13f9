//! Configuration management for the abuse guard service.
//! This module handles loading and managing configuration settings
//! from environment variables and configuration files.

mod settings;

pub use settings::{
    actions, patterns, AbuseThreshold, CleanupConfig, CloudflareConfig, EventsConfig,
    MetricsConfig, RateLimitConfig, RateLimitRule, RedisConfig, Settings, StoreBackend,
    StoreConfig,
};

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, config::ConfigError>;

/// Load the application configuration
pub fn load_config() -> ConfigResult<Settings> {
    Settings::load()
}
