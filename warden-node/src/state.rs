//! Shared node state and background maintenance.

use crate::notify::Notifier;
use crate::reputation::ReputationClient;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use metrics::{counter, gauge};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info};
use warden_core::storage;
use warden_core::{DecisionPipeline, SessionContext, SubmissionPayload, VisitStore, WardenConfig};

/// What the node remembers about a correlation cookie between submissions
#[derive(Debug, Clone)]
pub struct VisitorSession {
    pub started_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub prior: SubmissionPayload,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<WardenConfig>,
    pub store: Arc<dyn VisitStore>,
    pub pipeline: Arc<DecisionPipeline>,
    pub sessions: Arc<DashMap<String, VisitorSession>>,
    pub reputation: Arc<ReputationClient>,
    pub notifier: Arc<Notifier>,
}

impl AppState {
    /// Open the configured store and assemble the pipeline
    pub fn new(config: WardenConfig) -> Result<Self> {
        let store = storage::open(&config.storage).context("Failed to open visit store")?;
        Self::with_store(config, store)
    }

    pub fn with_store(config: WardenConfig, store: Arc<dyn VisitStore>) -> Result<Self> {
        let pipeline = DecisionPipeline::new(&config, Arc::clone(&store))
            .context("Failed to build decision pipeline")?;
        let reputation = ReputationClient::new(config.reputation.clone())?;
        let notifier = Notifier::new(config.notifications.clone())?;

        Ok(Self {
            config: Arc::new(config),
            store,
            pipeline: Arc::new(pipeline),
            sessions: Arc::new(DashMap::new()),
            reputation: Arc::new(reputation),
            notifier: Arc::new(notifier),
        })
    }

    /// Evaluation context for the visitor behind `cookie_id`
    pub fn session_context(&self, cookie_id: &str, now: DateTime<Utc>) -> SessionContext {
        let ctx = SessionContext::new(now);
        match self.sessions.get(cookie_id) {
            Some(session) => ctx
                .with_session_start(session.started_at)
                .with_prior(session.prior.clone()),
            None => ctx,
        }
    }

    /// Store `payload` as the visitor's latest submission, keeping the session start.
    /// New sessions are not tracked once `cookie.max_sessions` is reached.
    pub fn remember(&self, cookie_id: &str, payload: SubmissionPayload, now: DateTime<Utc>) {
        if !self.sessions.contains_key(cookie_id)
            && self.sessions.len() >= self.config.cookie.max_sessions
        {
            debug!(
                max_sessions = self.config.cookie.max_sessions,
                "Session table full, visitor not remembered"
            );
            return;
        }

        match self.sessions.entry(cookie_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let session = entry.get_mut();
                session.last_seen = now;
                session.prior = payload;
            }
            Entry::Vacant(entry) => {
                entry.insert(VisitorSession {
                    started_at: now,
                    last_seen: now,
                    prior: payload,
                });
            }
        }
    }

    /// Idle time after which a session is forgotten
    pub fn session_ttl(&self) -> ChronoDuration {
        let ttl = self.config.cookie.session_ttl();
        match self.config.retention.max_age() {
            Some(max_age) => ttl.min(max_age),
            None => ttl,
        }
    }

    /// Drop sessions idle for longer than [`AppState::session_ttl`]
    pub fn prune_sessions(&self, now: DateTime<Utc>) -> usize {
        let ttl = self.session_ttl();
        let before = self.sessions.len();
        self.sessions.retain(|_, session| now - session.last_seen < ttl);
        before.saturating_sub(self.sessions.len())
    }

    /// One maintenance pass: retention purge, session pruning, stored-visit gauge
    pub async fn run_maintenance(&self) {
        let now = Utc::now();
        let pruned = self.prune_sessions(now);
        if pruned > 0 {
            debug!(pruned = pruned, "Expired visitor sessions pruned");
        }

        let store = Arc::clone(&self.store);
        let max_age = self.config.retention.max_age();
        let result = tokio::task::spawn_blocking(move || -> warden_core::Result<(usize, usize)> {
            let purged = match max_age {
                Some(max_age) => store.purge_old(max_age)?,
                None => 0,
            };
            let stored = store.get_stats()?.total_visits;
            Ok((purged, stored))
        })
        .await;

        match result {
            Ok(Ok((purged, stored))) => {
                if purged > 0 {
                    info!(purged = purged, remaining = stored, "Old visits purged");
                    counter!("warden_records_purged_total", purged as u64);
                }
                gauge!("warden_stored_visits", stored as f64);
            }
            Ok(Err(e)) => {
                error!(error = %e, "Visit store maintenance failed");
                counter!("warden_persistence_failures_total", 1, "operation" => "purge");
            }
            Err(e) => error!(error = %e, "Maintenance task panicked"),
        }
    }

    /// Run [`AppState::run_maintenance`] every `retention.purge_interval_seconds`
    pub fn spawn_maintenance_task(&self) -> JoinHandle<()> {
        let state = self.clone();
        let period = Duration::from_secs(self.config.retention.purge_interval_seconds.max(1));
        tokio::spawn(async move {
            let mut interval = time::interval(period);
            loop {
                interval.tick().await;
                state.run_maintenance().await;
            }
        })
    }
}
