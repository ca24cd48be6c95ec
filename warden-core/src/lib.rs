//! Warden Core Library
//!
//! Decision pipeline for client-reported visitor telemetry: statistical behavior
//! heuristics, identity and reputation policy checks, a visit-rate limiter and
//! pluggable custom rules, all backed by a swappable visit store.

pub mod config;
pub mod error;
pub mod heuristics;
pub mod pipeline;
pub mod policy;
pub mod rate_limit;
pub mod record;
pub mod rules;
pub mod stats;
pub mod storage;
pub mod summary;
pub mod verdict;

// Re-export commonly used types
pub use config::{StorageConfig, WardenConfig};
pub use error::{Result, WardenError};
pub use pipeline::{DecisionPipeline, SessionContext};
pub use record::{BehavioralTrace, IpInfo, SubmissionPayload, TelemetryRecord};
pub use rules::{FnRule, Rule, RuleError, RuleMatch};
pub use storage::{BlockedAccess, Criteria, StoreStats, VisitStore};
pub use verdict::{BlockReason, Severity, Verdict};
