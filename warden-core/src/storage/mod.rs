//! Persistence contract shared by every visit store backend.
//!
//! Backends are synchronous; async callers run them on a blocking pool. None of
//! them index by field, so `find_by` and window queries may scan the whole history.

mod file;
mod session;
mod sqlite;

pub use file::FileStore;
pub use session::SessionStore;
pub use sqlite::SqliteStore;

use crate::config::StorageConfig;
use crate::error::Result;
use crate::record::TelemetryRecord;
use crate::summary::{browser_counts, platform_counts};
use crate::verdict::{BlockReason, Severity, Verdict};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::info;

/// Exact-match filter over flat top-level record fields, ANDed together
pub type Criteria = BTreeMap<String, Value>;

/// Aggregate counts over the stored history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_visits: usize,
    pub unique_fingerprints: usize,
    pub unique_ips: usize,
    pub country_counts: BTreeMap<String, usize>,
    pub browsers: BTreeMap<String, usize>,
    pub platforms: BTreeMap<String, usize>,
}

impl StoreStats {
    pub fn from_records(records: &[TelemetryRecord]) -> Self {
        let fingerprints: HashSet<&str> = records.iter().map(|r| r.fingerprint.as_str()).collect();
        let ips: HashSet<&str> = records.iter().map(|r| r.ip.as_str()).collect();

        let mut country_counts = BTreeMap::new();
        for record in records {
            *country_counts.entry(record.ip_info.country.clone()).or_insert(0) += 1;
        }

        Self {
            total_visits: records.len(),
            unique_fingerprints: fingerprints.len(),
            unique_ips: ips.len(),
            country_counts,
            browsers: browser_counts(records),
            platforms: platform_counts(records),
        }
    }
}

/// Entry in the blocked-access stream, written only for non-empty verdicts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockedAccess {
    pub timestamp: DateTime<Utc>,
    pub ip: String,
    pub fingerprint: String,
    pub cookie_id: String,
    pub reasons: Vec<BlockReason>,
    pub severity: Severity,
    /// Client-reported sections of the blocked submission
    #[serde(default)]
    pub data: Value,
}

impl BlockedAccess {
    pub fn new(record: &TelemetryRecord, verdict: &Verdict) -> Self {
        Self {
            timestamp: record.timestamp,
            ip: record.ip.clone(),
            fingerprint: record.fingerprint.clone(),
            cookie_id: record.cookie_id.clone(),
            reasons: verdict.reasons().to_vec(),
            severity: verdict.severity(),
            data: json!({
                "deviceData": record.device_data,
                "behavior": record.behavioral,
                "webrtc": record.webrtc_ips,
            }),
        }
    }
}

/// True when every criterion equals the record's top-level field of that name
pub fn matches(record: &TelemetryRecord, criteria: &Criteria) -> bool {
    if criteria.is_empty() {
        return true;
    }
    let Ok(Value::Object(fields)) = serde_json::to_value(record) else {
        return false;
    };
    criteria
        .iter()
        .all(|(field, expected)| fields.get(field) == Some(expected))
}

/// Storage-agnostic visit persistence
pub trait VisitStore: Send + Sync {
    /// Short backend name for logs
    fn backend(&self) -> &'static str;

    /// Persist one record; atomic with respect to concurrent saves
    fn save(&self, record: &TelemetryRecord) -> Result<()>;

    /// Every stored record in insertion order
    fn get_all(&self) -> Result<Vec<TelemetryRecord>>;

    fn find_by(&self, criteria: &Criteria) -> Result<Vec<TelemetryRecord>> {
        Ok(self
            .get_all()?
            .into_iter()
            .filter(|record| matches(record, criteria))
            .collect())
    }

    /// Records with `timestamp >= since`
    fn count_since(&self, since: DateTime<Utc>) -> Result<usize> {
        Ok(self
            .get_all()?
            .iter()
            .filter(|record| record.timestamp >= since)
            .count())
    }

    fn get_stats(&self) -> Result<StoreStats> {
        Ok(StoreStats::from_records(&self.get_all()?))
    }

    /// Drop records older than `cutoff`, returning how many were removed
    fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Keep only records younger than `max_age`; an age reaching past the
    /// representable range removes nothing
    fn purge_old(&self, max_age: Duration) -> Result<usize> {
        match Utc::now().checked_sub_signed(max_age) {
            Some(cutoff) => self.purge_before(cutoff),
            None => Ok(0),
        }
    }

    /// Append to the blocked-access stream
    fn log_blocked(&self, entry: &BlockedAccess) -> Result<()>;

    fn blocked(&self) -> Result<Vec<BlockedAccess>>;
}

/// Open the backend selected in configuration
pub fn open(config: &StorageConfig) -> Result<Arc<dyn VisitStore>> {
    let store: Arc<dyn VisitStore> = match config {
        StorageConfig::FileBacked { path, blocked_path } => {
            Arc::new(FileStore::open(path, blocked_path.as_deref())?)
        }
        StorageConfig::RelationalBacked { path, table } => Arc::new(SqliteStore::open(path, table)?),
        StorageConfig::SessionBacked { key } => Arc::new(SessionStore::new(key)),
    };

    info!(backend = store.backend(), "Visit store opened");
    Ok(store)
}
