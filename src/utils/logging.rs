use std::env;
use std::fmt;

use serde::Serialize;
use tracing_subscriber::{
    fmt::{format::FmtSpan, time::ChronoLocal},
    EnvFilter,
};

use super::{GuardError, GuardResult};

/// Initialize the logging system with the level taken from `RUST_LOG`
pub fn init_logging() -> GuardResult<()> {
    // Get the log level from environment variable or default to INFO
    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_level(true)
        .with_timer(ChronoLocal::rfc_3339())
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| GuardError::Internal(format!("failed to set tracing subscriber: {}", e)))
}

/// Create a new span for tracking request context
pub fn create_request_span(ip: &str, action_type: &str) -> tracing::Span {
    tracing::info_span!(
        "request",
        ip = %ip,
        action_type = %action_type,
        timestamp = %chrono::Utc::now()
    )
}

/// Log a rate limit evaluation
pub fn log_rate_limit(ip: &str, action_type: &str, count: usize, exceeded: bool) {
    if exceeded {
        tracing::warn!(
            ip = %ip,
            action_type = %action_type,
            count,
            event = "rate_limit_exceeded"
        );
    } else {
        tracing::debug!(
            ip = %ip,
            action_type = %action_type,
            count,
            event = "rate_limit_check"
        );
    }
}

/// Log the outcome of a firewall API call
pub fn log_firewall_event(event_type: &str, success: bool, details: Option<&str>) {
    if success {
        tracing::info!(
            event_type = %event_type,
            success,
            details = ?details,
            "Firewall rule updated"
        );
    } else {
        tracing::error!(
            event_type = %event_type,
            success,
            details = ?details,
            "Firewall rule update failed"
        );
    }
}

/// Severity attached to a security log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A structured entry for the security event log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityLogEntry {
    pub severity: Severity,
    pub message: String,
    pub category: String,
    pub data: serde_json::Value,
}

impl SecurityLogEntry {
    pub fn new(
        severity: Severity,
        message: impl Into<String>,
        category: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            severity,
            message: message.into(),
            category: category.into(),
            data,
        }
    }

    pub fn warning(
        message: impl Into<String>,
        category: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self::new(Severity::Warning, message, category, data)
    }
}

/// Sink for security events (blocks, unblocks, abuse detection, cleanup)
#[cfg_attr(test, mockall::automock)]
pub trait SecurityLog: Send + Sync {
    fn record(&self, entry: SecurityLogEntry);
}

/// Security log that emits `tracing` events on the `security` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSecurityLog;

impl SecurityLog for TracingSecurityLog {
    fn record(&self, entry: SecurityLogEntry) {
        let SecurityLogEntry {
            severity,
            message,
            category,
            data,
        } = entry;
        match severity {
            Severity::Info => tracing::info!(target: "security", %category, %data, "{}", message),
            Severity::Warning => {
                tracing::warn!(target: "security", %category, %data, "{}", message)
            }
            Severity::Error => tracing::error!(target: "security", %category, %data, "{}", message),
        }
    }
}
