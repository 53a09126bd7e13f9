//! Cloudflare integration for the abuse guard service.
//! Temporary IP blocks raised by the limiter are mirrored into zone IP
//! access rules so traffic is dropped at the edge as well.

mod client;
mod rules;

pub use client::{
    AccessRule, AccessRuleTarget, CloudflareApiError, CloudflareClient, CloudflareResponse,
    CreatedRule, FirewallApi,
};
pub use rules::FirewallRulesManager;
