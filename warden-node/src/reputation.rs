//! IP reputation lookup against an ipapi-compatible JSON endpoint.
//!
//! Lookups are bounded by the configured timeout. Any failure degrades to
//! [`IpInfo::unknown`] and never fails the submission.

use anyhow::{bail, Context, Result};
use metrics::counter;
use serde::Deserialize;
use tracing::{debug, warn};
use warden_core::config::ReputationConfig;
use warden_core::record::{IpInfo, UNKNOWN};

/// Response body of the reputation service
#[derive(Debug, Default, Deserialize)]
struct ReputationResponse {
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    country_name: Option<String>,
    #[serde(default)]
    org: Option<String>,
    #[serde(default)]
    tor: Option<bool>,
    #[serde(default)]
    proxy: Option<bool>,
    #[serde(default)]
    hosting: Option<bool>,
    /// Set by the service for reserved or malformed addresses
    #[serde(default)]
    error: bool,
    #[serde(default)]
    reason: Option<String>,
}

impl ReputationResponse {
    fn into_ip_info(self) -> IpInfo {
        let or_unknown = |value: Option<String>| value.unwrap_or_else(|| UNKNOWN.to_string());
        IpInfo {
            city: or_unknown(self.city),
            region: or_unknown(self.region),
            country: or_unknown(self.country_name),
            organization: or_unknown(self.org),
            is_tor: self.tor.unwrap_or(false),
            is_proxy: self.proxy.unwrap_or(false),
            is_hosting: self.hosting.unwrap_or(false),
        }
    }
}

pub struct ReputationClient {
    client: reqwest::Client,
    config: ReputationConfig,
}

impl ReputationClient {
    pub fn new(config: ReputationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to build reputation HTTP client")?;

        Ok(Self { client, config })
    }

    /// Reputation annotations for `ip`, or unknown values when unavailable
    pub async fn lookup(&self, ip: &str) -> IpInfo {
        if !self.config.enabled || ip == UNKNOWN {
            return IpInfo::unknown();
        }

        match self.fetch(ip).await {
            Ok(info) => {
                debug!(ip = %ip, country = %info.country, "Reputation lookup completed");
                info
            }
            Err(e) => {
                warn!(ip = %ip, error = %e, "Reputation lookup failed, using unknown");
                counter!("warden_reputation_lookup_failures_total", 1);
                IpInfo::unknown()
            }
        }
    }

    async fn fetch(&self, ip: &str) -> Result<IpInfo> {
        let url = self.config.endpoint.replace("{ip}", ip);
        let body: ReputationResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("Invalid reputation response")?;

        if body.error {
            bail!(
                "reputation service rejected address: {}",
                body.reason.as_deref().unwrap_or("no reason given")
            );
        }
        Ok(body.into_ip_info())
    }
}
