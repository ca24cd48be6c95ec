//! Pluggable custom rules evaluated after the built-in checks.

use crate::config::{CustomRuleConfig, RuleField};
use crate::error::{Result, WardenError};
use crate::pipeline::SessionContext;
use crate::record::TelemetryRecord;
use crate::verdict::BlockReason;
use regex::Regex;
use thiserror::Error;

/// Failure inside a single rule; logged and skipped by the pipeline
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    #[error("Rule evaluation failed: {0}")]
    Evaluation(String),

    #[error("Rule panicked: {0}")]
    Panicked(String),
}

/// What a matching rule contributes to the verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleMatch {
    /// Reported as the generic `custom_rule` reason
    Flagged,
    /// Reported under the rule's own tag
    Tagged(String),
}

impl RuleMatch {
    pub fn into_reason(self) -> BlockReason {
        match self {
            RuleMatch::Flagged => BlockReason::CustomRule(None),
            RuleMatch::Tagged(tag) => BlockReason::parse(&tag),
        }
    }
}

pub type RuleOutcome = std::result::Result<Option<RuleMatch>, RuleError>;

/// Predicate over a record and its session context
pub trait Rule: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate(&self, record: &TelemetryRecord, ctx: &SessionContext) -> RuleOutcome;
}

/// Rule backed by a closure
pub struct FnRule<F> {
    name: String,
    predicate: F,
}

impl<F> FnRule<F>
where
    F: Fn(&TelemetryRecord, &SessionContext) -> RuleOutcome + Send + Sync,
{
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

impl<F> Rule for FnRule<F>
where
    F: Fn(&TelemetryRecord, &SessionContext) -> RuleOutcome + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, record: &TelemetryRecord, ctx: &SessionContext) -> RuleOutcome {
        (self.predicate)(record, ctx)
    }
}

/// Declarative rule: regex over one record field
#[derive(Debug, Clone)]
pub struct PatternRule {
    name: String,
    field: RuleField,
    pattern: Regex,
    tag: Option<String>,
}

impl PatternRule {
    pub fn from_config(config: &CustomRuleConfig) -> Result<Self> {
        let pattern = Regex::new(&config.pattern)
            .map_err(|e| WardenError::Rule(format!("{}: {}", config.name, e)))?;
        Ok(Self {
            name: config.name.clone(),
            field: config.field,
            pattern,
            tag: config.tag.clone(),
        })
    }

    fn field_value<'a>(&self, record: &'a TelemetryRecord) -> Option<&'a str> {
        match self.field {
            RuleField::UserAgent => record.user_agent(),
            RuleField::Fingerprint => Some(&record.fingerprint),
            RuleField::Ip => Some(&record.ip),
            RuleField::Country => Some(&record.ip_info.country),
            RuleField::Organization => Some(&record.ip_info.organization),
        }
    }
}

impl Rule for PatternRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, record: &TelemetryRecord, _ctx: &SessionContext) -> RuleOutcome {
        let matched = self
            .field_value(record)
            .map(|value| self.pattern.is_match(value))
            .unwrap_or(false);

        Ok(matched.then(|| match &self.tag {
            Some(tag) => RuleMatch::Tagged(tag.clone()),
            None => RuleMatch::Flagged,
        }))
    }
}

/// Compile configured rules, preserving their order
pub fn build_rules(configs: &[CustomRuleConfig]) -> Result<Vec<Box<dyn Rule>>> {
    configs
        .iter()
        .map(|config| PatternRule::from_config(config).map(|rule| Box::new(rule) as Box<dyn Rule>))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn bot_rule(tag: Option<&str>) -> CustomRuleConfig {
        CustomRuleConfig {
            name: "bot_user_agent".to_string(),
            field: RuleField::UserAgent,
            pattern: "(?i)(bot|crawler)".to_string(),
            tag: tag.map(str::to_string),
        }
    }

    fn record_with_ua(ua: &str) -> TelemetryRecord {
        let mut record = TelemetryRecord::new(Utc::now(), "fp", "trace", "1.1.1.1");
        record.device_data.insert("userAgent".into(), json!(ua));
        record
    }

    #[test]
    fn test_pattern_rule_tags_match() {
        let rule = PatternRule::from_config(&bot_rule(Some("bot_detected"))).unwrap();
        let ctx = SessionContext::new(Utc::now());

        let outcome = rule.evaluate(&record_with_ua("Googlebot/2.1"), &ctx).unwrap();
        assert_eq!(outcome, Some(RuleMatch::Tagged("bot_detected".into())));
        assert_eq!(
            outcome.map(RuleMatch::into_reason),
            Some(BlockReason::CustomRule(Some("bot_detected".into())))
        );

        assert_eq!(rule.evaluate(&record_with_ua("Mozilla/5.0"), &ctx).unwrap(), None);
    }

    #[test]
    fn test_untagged_rule_reports_generic_reason() {
        let rule = PatternRule::from_config(&bot_rule(None)).unwrap();
        let ctx = SessionContext::new(Utc::now());
        let outcome = rule.evaluate(&record_with_ua("SomeCrawler"), &ctx).unwrap();
        assert_eq!(outcome.map(RuleMatch::into_reason), Some(BlockReason::CustomRule(None)));
    }

    #[test]
    fn test_missing_user_agent_does_not_match() {
        let rule = PatternRule::from_config(&bot_rule(None)).unwrap();
        let record = TelemetryRecord::new(Utc::now(), "fp", "trace", "1.1.1.1");
        assert_eq!(rule.evaluate(&record, &SessionContext::new(Utc::now())).unwrap(), None);
    }

    #[test]
    fn test_build_rules_rejects_bad_pattern() {
        let mut config = bot_rule(None);
        config.pattern = "(unclosed".to_string();
        assert!(matches!(build_rules(&[config]), Err(WardenError::Rule(_))));
    }

    #[test]
    fn test_fn_rule_sees_context() {
        let rule = FnRule::new("repeat_visitor", |_record: &TelemetryRecord, ctx: &SessionContext| {
            Ok(ctx.prior.is_some().then_some(RuleMatch::Tagged("repeat_visitor".into())))
        });
        let record = TelemetryRecord::new(Utc::now(), "fp", "trace", "1.1.1.1");

        assert_eq!(rule.evaluate(&record, &SessionContext::new(Utc::now())).unwrap(), None);

        let ctx = SessionContext::new(Utc::now()).with_prior(Default::default());
        assert!(rule.evaluate(&record, &ctx).unwrap().is_some());
        assert_eq!(rule.name(), "repeat_visitor");
    }
}
