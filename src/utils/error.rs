use thiserror::Error;

use crate::store::StoreError;

/// Custom error types for the abuse guard service
#[derive(Error, Debug)]
pub enum GuardError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Expiring store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Redis related errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Firewall integration errors
    #[error("Firewall API error: {0}")]
    Firewall(String),

    /// Rate limiting errors
    #[error("Rate limit exceeded for IP: {0}")]
    RateLimitExceeded(String),

    /// The IP currently holds a temporary block
    #[error("IP blocked: {0}")]
    IpBlocked(String),

    /// Invalid request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for abuse guard operations
pub type GuardResult<T> = Result<T, GuardError>;

impl From<reqwest::Error> for GuardError {
    fn from(err: reqwest::Error) -> Self {
        GuardError::Firewall(err.to_string())
    }
}

impl From<std::io::Error> for GuardError {
    fn from(err: std::io::Error) -> Self {
        GuardError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_the_ip() {
        let err = GuardError::IpBlocked("1.2.3.4".to_string());
        assert_eq!(err.to_string(), "IP blocked: 1.2.3.4");

        let err = GuardError::RateLimitExceeded("1.2.3.4".to_string());
        assert_eq!(err.to_string(), "Rate limit exceeded for IP: 1.2.3.4");
    }

    #[test]
    fn store_errors_convert() {
        let err: GuardError = StoreError::Backend("down".to_string()).into();
        assert!(matches!(err, GuardError::Store(_)));
    }
}
