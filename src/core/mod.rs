//! Core functionality for the abuse guard service.
//! This module contains the sliding-window rate limiter, abuse escalation
//! and the IP blocklist it escalates into.

mod clock;
mod ip_blocklist;
mod rate_limiter;
mod window;

pub use clock::{Clock, MockClock, SystemClock};
pub use ip_blocklist::{BlockRecord, IpBlocklist};
pub use rate_limiter::{
    RateLimitStatus, RateLimiter, UserRateGate, REQUEST_FREQUENCY_THRESHOLD,
    REQUEST_FREQUENCY_WINDOW_SECONDS,
};
pub use window::AttemptLog;
