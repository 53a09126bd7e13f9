//! Utility modules for the abuse guard service.
//! This module contains logging and error types used across the crate.

mod error;
mod logging;

pub use logging::{
    create_request_span, init_logging, log_firewall_event, log_rate_limit, SecurityLog,
    SecurityLogEntry, Severity, TracingSecurityLog,
};

#[cfg(test)]
pub use logging::MockSecurityLog;

pub use error::{GuardError, GuardResult};
