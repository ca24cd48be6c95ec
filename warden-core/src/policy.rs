//! Static identity and network-reputation checks.
//!
//! Every check runs independently, so a record can collect both
//! `ip_not_whitelisted` and `ip_blacklisted` at once.

use crate::config::AccessConfig;
use crate::record::TelemetryRecord;
use crate::verdict::BlockReason;
use ipnet::IpNet;
use std::net::IpAddr;
use tracing::warn;

/// One configured address entry: an exact address string or a CIDR range
#[derive(Debug, Clone)]
enum IpEntry {
    Exact(String),
    Range(IpNet),
}

impl IpEntry {
    fn parse(raw: &str) -> Self {
        if raw.contains('/') {
            match raw.parse::<IpNet>() {
                Ok(net) => return IpEntry::Range(net),
                Err(e) => warn!(entry = %raw, error = %e, "Failed to parse CIDR entry, matching literally"),
            }
        }
        IpEntry::Exact(raw.to_string())
    }

    fn matches(&self, ip: &str, parsed: Option<IpAddr>) -> bool {
        match self {
            IpEntry::Exact(entry) => entry == ip,
            IpEntry::Range(net) => parsed.map(|addr| net.contains(&addr)).unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct IpList {
    entries: Vec<IpEntry>,
}

impl IpList {
    fn new(raw: &[String]) -> Self {
        Self {
            entries: raw.iter().map(|entry| IpEntry::parse(entry)).collect(),
        }
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn contains(&self, ip: &str) -> bool {
        let parsed = ip.parse::<IpAddr>().ok();
        self.entries.iter().any(|entry| entry.matches(ip, parsed))
    }
}

/// Access policy compiled from [`AccessConfig`]
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    config: AccessConfig,
    whitelist_ips: IpList,
    blacklist_ips: IpList,
}

impl AccessPolicy {
    pub fn new(config: AccessConfig) -> Self {
        let whitelist_ips = IpList::new(&config.whitelist_ips);
        let blacklist_ips = IpList::new(&config.blacklist_ips);
        Self {
            config,
            whitelist_ips,
            blacklist_ips,
        }
    }

    /// Reasons triggered by the record's identity and reputation annotations
    pub fn check(&self, record: &TelemetryRecord) -> Vec<BlockReason> {
        let mut reasons = Vec::new();
        let ip = record.ip.as_str();
        let fingerprint = record.fingerprint.as_str();

        if !self.whitelist_ips.is_empty() && !self.whitelist_ips.contains(ip) {
            reasons.push(BlockReason::IpNotWhitelisted);
        }
        if self.blacklist_ips.contains(ip) {
            reasons.push(BlockReason::IpBlacklisted);
        }

        let whitelist_fps = &self.config.whitelist_fingerprints;
        if !whitelist_fps.is_empty() && !whitelist_fps.iter().any(|fp| fp == fingerprint) {
            reasons.push(BlockReason::FingerprintNotWhitelisted);
        }
        if self.config.blacklist_fingerprints.iter().any(|fp| fp == fingerprint) {
            reasons.push(BlockReason::FingerprintBlacklisted);
        }

        let info = &record.ip_info;
        if self.config.block_countries.iter().any(|c| c == &info.country) {
            reasons.push(BlockReason::CountryBlocked);
        }

        if self.config.block_tor && info.is_tor {
            reasons.push(BlockReason::TorNetwork);
        }
        if self.config.block_proxies && info.is_proxy {
            reasons.push(BlockReason::ProxyDetected);
        }
        if self.config.block_datacenters && info.is_hosting {
            reasons.push(BlockReason::DatacenterIp);
        }

        reasons
    }
}
