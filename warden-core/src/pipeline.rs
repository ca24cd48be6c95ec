//! Decision pipeline: combines every check into one verdict.
//!
//! Evaluation order is access policy, rate limit, behavior heuristics and then
//! custom rules in registration order. Every stage runs; reasons accumulate.
//! The only clock the pipeline reads is [`SessionContext::now`], so evaluating
//! the same record against the same stored history yields the same verdict.

use crate::config::WardenConfig;
use crate::error::Result;
use crate::heuristics::BehaviorAnalyzer;
use crate::policy::AccessPolicy;
use crate::rate_limit::RateLimiter;
use crate::record::{SubmissionPayload, TelemetryRecord};
use crate::rules::{build_rules, Rule, RuleError};
use crate::storage::VisitStore;
use crate::verdict::Verdict;
use chrono::{DateTime, Utc};
use metrics::counter;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Per-visitor context threaded explicitly into each evaluation
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Evaluation instant
    pub now: DateTime<Utc>,
    /// When the visitor's session began; the record's own timestamp when unknown
    pub started_at: Option<DateTime<Utc>>,
    /// Payload of the visitor's previous submission, if any
    pub prior: Option<SubmissionPayload>,
}

impl SessionContext {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            started_at: None,
            prior: None,
        }
    }

    pub fn with_session_start(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = Some(started_at);
        self
    }

    pub fn with_prior(mut self, prior: SubmissionPayload) -> Self {
        self.prior = Some(prior);
        self
    }

    /// Session length in seconds, floored at one second
    pub fn elapsed_seconds(&self, record: &TelemetryRecord) -> f64 {
        let start = self.started_at.unwrap_or(record.timestamp);
        let millis = (self.now - start).num_milliseconds();
        (millis as f64 / 1000.0).max(1.0)
    }
}

pub struct DecisionPipeline {
    policy: AccessPolicy,
    rate_limiter: RateLimiter,
    behavior: BehaviorAnalyzer,
    rules: Vec<Box<dyn Rule>>,
}

impl DecisionPipeline {
    /// Build the pipeline with the declarative rules from `config`
    pub fn new(config: &WardenConfig, store: Arc<dyn VisitStore>) -> Result<Self> {
        let rules = build_rules(&config.rules)?;
        info!(
            custom_rules = rules.len(),
            rate_limit = config.rate_limit.enabled,
            behavior = config.behavior.enabled,
            "Decision pipeline initialized"
        );

        Ok(Self {
            policy: AccessPolicy::new(config.access.clone()),
            rate_limiter: RateLimiter::new(config.rate_limit.clone(), store),
            behavior: BehaviorAnalyzer::new(config.behavior.clone()),
            rules,
        })
    }

    /// Append a rule after the ones already registered
    pub fn with_rule(mut self, rule: impl Rule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Evaluate `record`; never fails, a misbehaving stage only loses its own reasons
    #[instrument(skip(self, record, ctx), fields(ip = %record.ip, fingerprint = %record.fingerprint))]
    pub fn evaluate(&self, record: &TelemetryRecord, ctx: &SessionContext) -> Verdict {
        let mut verdict = Verdict::new();

        verdict.extend(self.policy.check(record));
        verdict.extend(self.rate_limiter.check(ctx.now));
        verdict.extend(
            self.behavior
                .analyze(&record.behavioral, ctx.elapsed_seconds(record)),
        );

        for rule in &self.rules {
            let outcome = catch_unwind(AssertUnwindSafe(|| rule.evaluate(record, ctx)))
                .unwrap_or_else(|payload| Err(RuleError::Panicked(panic_message(payload.as_ref()))));

            match outcome {
                Ok(Some(found)) => verdict.push(found.into_reason()),
                Ok(None) => {}
                Err(e) => {
                    warn!(rule = rule.name(), error = %e, "Custom rule failed, skipping");
                    counter!("warden_custom_rule_failures_total", 1);
                }
            }
        }

        for reason in verdict.reasons() {
            counter!("warden_block_reasons_total", 1, "reason" => reason.as_str().to_string());
        }

        debug!(
            reasons = ?verdict.reason_names(),
            severity = %verdict.severity(),
            "Record evaluated"
        );

        verdict
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BehaviorConfig;
    use crate::rules::{FnRule, RuleMatch, RuleOutcome};
    use crate::storage::SessionStore;
    use crate::verdict::BlockReason;
    use chrono::Duration;

    fn quiet_config() -> WardenConfig {
        WardenConfig {
            behavior: BehaviorConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn pipeline(config: &WardenConfig) -> DecisionPipeline {
        DecisionPipeline::new(config, Arc::new(SessionStore::new("pipeline"))).unwrap()
    }

    fn tag(name: &'static str) -> impl Fn(&TelemetryRecord, &SessionContext) -> RuleOutcome + Send + Sync {
        move |_, _| Ok(Some(RuleMatch::Tagged(name.to_string())))
    }

    #[test]
    fn test_elapsed_seconds() {
        let now = Utc::now();
        let record = TelemetryRecord::new(now, "fp", "c", "1.1.1.1");

        assert_eq!(SessionContext::new(now).elapsed_seconds(&record), 1.0);
        let ctx = SessionContext::new(now).with_session_start(now - Duration::seconds(90));
        assert_eq!(ctx.elapsed_seconds(&record), 90.0);
    }

    #[test]
    fn test_clean_record_passes() {
        let record = TelemetryRecord::new(Utc::now(), "fp", "c", "1.1.1.1");
        let verdict = pipeline(&quiet_config()).evaluate(&record, &SessionContext::new(Utc::now()));
        assert!(!verdict.should_block());
    }

    #[test]
    fn test_failing_rules_are_skipped() {
        let pipeline = pipeline(&quiet_config())
            .with_rule(FnRule::new("first", tag("first_tag")))
            .with_rule(FnRule::new("broken", |_: &TelemetryRecord, _: &SessionContext| {
                Err(RuleError::Evaluation("lookup table missing".into()))
            }))
            .with_rule(FnRule::new("panicky", |_: &TelemetryRecord, _: &SessionContext| -> RuleOutcome {
                panic!("rule bug")
            }))
            .with_rule(FnRule::new("last", |_: &TelemetryRecord, _: &SessionContext| {
                Ok(Some(RuleMatch::Flagged))
            }));

        let record = TelemetryRecord::new(Utc::now(), "fp", "c", "1.1.1.1");
        let verdict = pipeline.evaluate(&record, &SessionContext::new(Utc::now()));

        assert_eq!(
            verdict.reasons(),
            &[
                BlockReason::CustomRule(Some("first_tag".into())),
                BlockReason::CustomRule(None),
            ]
        );
    }

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "unknown panic");
    }
}
