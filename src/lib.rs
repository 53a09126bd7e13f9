//! IP rate limiting, abuse-pattern escalation and temporary blocking.
//!
//! The [`core::RateLimiter`] keeps sliding-window attempt logs per IP and
//! action, escalates repeated abuse into temporary IP blocks and announces
//! block changes on an [`events::EventBus`]. All state lives in an
//! [`store::ExpiringStore`], so limiter instances are stateless and can be
//! shared freely.

pub mod cloudflare;
pub mod config;
pub mod core;
pub mod events;
pub mod service;
pub mod store;
pub mod utils;

pub use crate::core::{BlockRecord, RateLimiter};
pub use crate::service::GuardService;
pub use crate::utils::{GuardError, GuardResult};
