//! Ephemeral in-process store scoped by a session key.
//!
//! Clones share the same maps, so one store can be handed to every request
//! handler. Blocked accesses live under `<key>_blocked`.

use super::{BlockedAccess, VisitStore};
use crate::error::Result;
use crate::record::TelemetryRecord;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct SessionStore {
    key: String,
    blocked_key: String,
    visits: Arc<DashMap<String, Vec<TelemetryRecord>>>,
    blocked: Arc<DashMap<String, Vec<BlockedAccess>>>,
}

impl SessionStore {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            blocked_key: format!("{key}_blocked"),
            visits: Arc::new(DashMap::new()),
            blocked: Arc::new(DashMap::new()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl VisitStore for SessionStore {
    fn backend(&self) -> &'static str {
        "session"
    }

    fn save(&self, record: &TelemetryRecord) -> Result<()> {
        // the shard write lock makes the push atomic
        self.visits
            .entry(self.key.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    fn get_all(&self) -> Result<Vec<TelemetryRecord>> {
        Ok(self
            .visits
            .get(&self.key)
            .map(|records| records.clone())
            .unwrap_or_default())
    }

    fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let Some(mut records) = self.visits.get_mut(&self.key) else {
            return Ok(0);
        };
        let before = records.len();
        records.retain(|record| record.timestamp >= cutoff);
        Ok(before - records.len())
    }

    fn log_blocked(&self, entry: &BlockedAccess) -> Result<()> {
        self.blocked
            .entry(self.blocked_key.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    fn blocked(&self) -> Result<Vec<BlockedAccess>> {
        Ok(self
            .blocked
            .get(&self.blocked_key)
            .map(|entries| entries.clone())
            .unwrap_or_default())
    }
}
