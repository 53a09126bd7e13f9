use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};

use crate::config::CloudflareConfig;
use crate::utils::{GuardError, GuardResult};

const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Firewall that can mirror temporary IP blocks
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FirewallApi: Send + Sync {
    /// Create a block rule for `ip`, returning the rule id
    async fn block_ip(&self, ip: &str, notes: &str) -> GuardResult<String>;

    /// Delete a rule previously returned by `block_ip`
    async fn delete_rule(&self, rule_id: &str) -> GuardResult<()>;
}

/// Represents a Cloudflare API response
#[derive(Debug, Deserialize)]
pub struct CloudflareResponse<T> {
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<CloudflareApiError>,
    pub result: Option<T>,
}

impl<T> CloudflareResponse<T> {
    /// Turn an unsuccessful envelope into an error
    pub fn into_result(self) -> GuardResult<Option<T>> {
        if self.success {
            return Ok(self.result);
        }

        let messages: Vec<String> = self
            .errors
            .iter()
            .map(|e| format!("{} ({})", e.message, e.code))
            .collect();
        Err(GuardError::Firewall(if messages.is_empty() {
            "request unsuccessful".to_string()
        } else {
            messages.join("; ")
        }))
    }
}

/// Represents a Cloudflare API error
#[derive(Debug, Deserialize)]
pub struct CloudflareApiError {
    pub code: i32,
    pub message: String,
}

/// IP access rule as sent to Cloudflare
#[derive(Debug, Serialize)]
pub struct AccessRule {
    pub mode: String,
    pub configuration: AccessRuleTarget,
    pub notes: String,
}

#[derive(Debug, Serialize)]
pub struct AccessRuleTarget {
    pub target: String,
    pub value: String,
}

impl AccessRule {
    pub fn block_ip(ip: &str, notes: &str) -> Self {
        Self {
            mode: "block".to_string(),
            configuration: AccessRuleTarget {
                target: if ip.contains(':') { "ip6" } else { "ip" }.to_string(),
                value: ip.to_string(),
            },
            notes: notes.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatedRule {
    pub id: String,
}

/// Client for Cloudflare's zone IP access rules
pub struct CloudflareClient {
    client: ReqwestClient,
    api_token: String,
    zone_id: String,
    base_url: String,
}

impl CloudflareClient {
    /// Creates a new Cloudflare client
    pub fn new(config: &CloudflareConfig) -> GuardResult<Self> {
        Ok(Self {
            client: ReqwestClient::builder()
                .timeout(Duration::from_secs(30))
                .build()?,
            api_token: config.api_token.clone(),
            zone_id: config.zone_id.clone(),
            base_url: CLOUDFLARE_API_BASE.to_string(),
        })
    }

    /// Point the client at another API root
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn rules_url(&self) -> String {
        format!("{}/zones/{}/firewall/access_rules/rules", self.base_url, self.zone_id)
    }
}

#[async_trait]
impl FirewallApi for CloudflareClient {
    async fn block_ip(&self, ip: &str, notes: &str) -> GuardResult<String> {
        let response: CloudflareResponse<CreatedRule> = self
            .client
            .post(self.rules_url())
            .bearer_auth(&self.api_token)
            .json(&AccessRule::block_ip(ip, notes))
            .send()
            .await?
            .json()
            .await?;

        response
            .into_result()?
            .map(|rule| rule.id)
            .ok_or_else(|| GuardError::Firewall("access rule created without an id".to_string()))
    }

    async fn delete_rule(&self, rule_id: &str) -> GuardResult<()> {
        let url = format!("{}/{}", self.rules_url(), rule_id);
        let response: CloudflareResponse<serde_json::Value> = self
            .client
            .delete(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await?
            .json()
            .await?;

        response.into_result().map(|_| ())
    }
}
