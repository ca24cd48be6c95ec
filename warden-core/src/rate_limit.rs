//! Sliding-window visit limiter backed by the visit store.
//!
//! The count is global across all visitors: every record inside the window
//! counts towards the ceiling regardless of fingerprint or address.

use crate::config::{capped_seconds, RateLimitConfig};
use crate::error::Result;
use crate::storage::VisitStore;
use crate::verdict::BlockReason;
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    store: Arc<dyn VisitStore>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, store: Arc<dyn VisitStore>) -> Self {
        Self { config, store }
    }

    pub fn window(&self) -> Duration {
        capped_seconds(self.config.window_seconds)
    }

    /// Stored visits with a timestamp at or after `now - window`
    pub fn count_recent(&self, now: DateTime<Utc>) -> Result<usize> {
        self.store.count_since(now - self.window())
    }

    /// `rate_limit_exceeded` when the window holds more visits than allowed.
    /// A failed count is logged and treated as within limits.
    pub fn check(&self, now: DateTime<Utc>) -> Option<BlockReason> {
        if !self.config.enabled {
            return None;
        }

        match self.count_recent(now) {
            Ok(count) if count > self.config.max_visits => {
                debug!(
                    visits = count,
                    max_visits = self.config.max_visits,
                    window_seconds = self.config.window_seconds,
                    "Visit rate limit exceeded"
                );
                Some(BlockReason::RateLimitExceeded)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(backend = self.store.backend(), error = %e, "Failed to count recent visits");
                counter!("warden_persistence_failures_total", 1, "operation" => "count");
                None
            }
        }
    }
}
