//! Block reasons, severity classes and the verdict they form.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Tag naming why a visitor should be blocked
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockReason {
    IpNotWhitelisted,
    IpBlacklisted,
    FingerprintNotWhitelisted,
    FingerprintBlacklisted,
    CountryBlocked,
    TorNetwork,
    ProxyDetected,
    DatacenterIp,
    RateLimitExceeded,
    SuspiciousMovementPattern,
    ImpossibleMovementSpeed,
    GeometricMovementPattern,
    RegularClickPattern,
    IdenticalClickCoordinates,
    InhumanTypingSpeed,
    NoTypingMistakes,
    LimitedInteractionArea,
    UnnaturalScrollPattern,
    SuspiciousClickRate,
    SuspiciousMoveRate,
    NoHumanIdle,
    /// Contributed by a custom rule, optionally with its own tag
    CustomRule(Option<String>),
}

const BUILTIN: &[BlockReason] = &[
    BlockReason::IpNotWhitelisted,
    BlockReason::IpBlacklisted,
    BlockReason::FingerprintNotWhitelisted,
    BlockReason::FingerprintBlacklisted,
    BlockReason::CountryBlocked,
    BlockReason::TorNetwork,
    BlockReason::ProxyDetected,
    BlockReason::DatacenterIp,
    BlockReason::RateLimitExceeded,
    BlockReason::SuspiciousMovementPattern,
    BlockReason::ImpossibleMovementSpeed,
    BlockReason::GeometricMovementPattern,
    BlockReason::RegularClickPattern,
    BlockReason::IdenticalClickCoordinates,
    BlockReason::InhumanTypingSpeed,
    BlockReason::NoTypingMistakes,
    BlockReason::LimitedInteractionArea,
    BlockReason::UnnaturalScrollPattern,
    BlockReason::SuspiciousClickRate,
    BlockReason::SuspiciousMoveRate,
    BlockReason::NoHumanIdle,
];

impl BlockReason {
    /// Wire name of the reason
    pub fn as_str(&self) -> &str {
        match self {
            BlockReason::IpNotWhitelisted => "ip_not_whitelisted",
            BlockReason::IpBlacklisted => "ip_blacklisted",
            BlockReason::FingerprintNotWhitelisted => "fingerprint_not_whitelisted",
            BlockReason::FingerprintBlacklisted => "fingerprint_blacklisted",
            BlockReason::CountryBlocked => "country_blocked",
            BlockReason::TorNetwork => "tor_network",
            BlockReason::ProxyDetected => "proxy_detected",
            BlockReason::DatacenterIp => "datacenter_ip",
            BlockReason::RateLimitExceeded => "rate_limit_exceeded",
            BlockReason::SuspiciousMovementPattern => "suspicious_movement_pattern",
            BlockReason::ImpossibleMovementSpeed => "impossible_movement_speed",
            BlockReason::GeometricMovementPattern => "geometric_movement_pattern",
            BlockReason::RegularClickPattern => "regular_click_pattern",
            BlockReason::IdenticalClickCoordinates => "identical_click_coordinates",
            BlockReason::InhumanTypingSpeed => "inhuman_typing_speed",
            BlockReason::NoTypingMistakes => "no_typing_mistakes",
            BlockReason::LimitedInteractionArea => "limited_interaction_area",
            BlockReason::UnnaturalScrollPattern => "unnatural_scroll_pattern",
            BlockReason::SuspiciousClickRate => "suspicious_click_rate",
            BlockReason::SuspiciousMoveRate => "suspicious_move_rate",
            BlockReason::NoHumanIdle => "no_human_idle",
            BlockReason::CustomRule(Some(tag)) => tag,
            BlockReason::CustomRule(None) => "custom_rule",
        }
    }

    /// Parse a wire name; unknown names become custom-rule tags
    pub fn parse(name: &str) -> Self {
        if name == "custom_rule" {
            return BlockReason::CustomRule(None);
        }
        BUILTIN
            .iter()
            .find(|reason| reason.as_str() == name)
            .cloned()
            .unwrap_or_else(|| BlockReason::CustomRule(Some(name.to_string())))
    }

    /// Severity class this reason contributes
    pub fn severity(&self) -> Severity {
        match self {
            BlockReason::IpBlacklisted
            | BlockReason::FingerprintBlacklisted
            | BlockReason::TorNetwork => Severity::High,
            BlockReason::ProxyDetected
            | BlockReason::DatacenterIp
            | BlockReason::RateLimitExceeded => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for BlockReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BlockReason {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(BlockReason::parse(&name))
    }
}

/// Advisory urgency of a verdict, used only to decide notification delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        };
        f.write_str(name)
    }
}

/// Ordered, duplicate-free set of triggered reasons. Non-empty means block.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Verdict {
    reasons: Vec<BlockReason>,
}

impl Verdict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a reason unless it is already present
    pub fn push(&mut self, reason: BlockReason) {
        if !self.reasons.contains(&reason) {
            self.reasons.push(reason);
        }
    }

    pub fn extend(&mut self, reasons: impl IntoIterator<Item = BlockReason>) {
        for reason in reasons {
            self.push(reason);
        }
    }

    pub fn reasons(&self) -> &[BlockReason] {
        &self.reasons
    }

    pub fn contains(&self, reason: &BlockReason) -> bool {
        self.reasons.contains(reason)
    }

    pub fn is_empty(&self) -> bool {
        self.reasons.is_empty()
    }

    pub fn should_block(&self) -> bool {
        !self.is_empty()
    }

    /// Highest severity among the matched reasons, `Low` for an empty verdict
    pub fn severity(&self) -> Severity {
        self.reasons
            .iter()
            .map(BlockReason::severity)
            .max()
            .unwrap_or_default()
    }

    /// Reason names in trigger order
    pub fn reason_names(&self) -> Vec<String> {
        self.reasons.iter().map(|r| r.as_str().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_is_ordered_and_duplicate_free() {
        let mut verdict = Verdict::new();
        verdict.push(BlockReason::RateLimitExceeded);
        verdict.push(BlockReason::IpBlacklisted);
        verdict.push(BlockReason::RateLimitExceeded);

        assert_eq!(
            verdict.reasons(),
            &[BlockReason::RateLimitExceeded, BlockReason::IpBlacklisted]
        );
    }

    #[test]
    fn test_severity_takes_highest_class() {
        let mut verdict = Verdict::new();
        assert_eq!(verdict.severity(), Severity::Low);

        verdict.push(BlockReason::NoHumanIdle);
        assert_eq!(verdict.severity(), Severity::Low);

        verdict.push(BlockReason::ProxyDetected);
        assert_eq!(verdict.severity(), Severity::Medium);

        verdict.push(BlockReason::TorNetwork);
        assert_eq!(verdict.severity(), Severity::High);
    }

    #[test]
    fn test_custom_rule_names() {
        assert_eq!(BlockReason::CustomRule(None).as_str(), "custom_rule");
        assert_eq!(
            BlockReason::CustomRule(Some("bot_detected".into())).as_str(),
            "bot_detected"
        );
        assert_eq!(BlockReason::CustomRule(None).severity(), Severity::Low);
    }

    #[test]
    fn test_parse_is_inverse_of_as_str() {
        for reason in BUILTIN {
            assert_eq!(&BlockReason::parse(reason.as_str()), reason);
        }
        assert_eq!(BlockReason::parse("custom_rule"), BlockReason::CustomRule(None));
        assert_eq!(
            BlockReason::parse("bot_detected"),
            BlockReason::CustomRule(Some("bot_detected".into()))
        );
    }

    #[test]
    fn test_verdict_serializes_as_names() {
        let mut verdict = Verdict::new();
        verdict.push(BlockReason::IpBlacklisted);
        verdict.push(BlockReason::CustomRule(Some("bot_detected".into())));

        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "reasons": ["ip_blacklisted", "bot_detected"] })
        );
        assert_eq!(Severity::Medium.to_string(), "medium");
    }
}
