//! Outbound notifications for blocked visitors.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use warden_core::config::NotificationConfig;
use warden_core::{BlockReason, Severity, TelemetryRecord, Verdict};

/// JSON body POSTed to the webhook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockNotification {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub ip: String,
    pub fingerprint: String,
    pub reasons: Vec<BlockReason>,
    pub severity: Severity,
}

impl BlockNotification {
    pub fn new(record: &TelemetryRecord, verdict: &Verdict) -> Self {
        Self {
            kind: "access_blocked".to_string(),
            timestamp: record.timestamp,
            ip: record.ip.clone(),
            fingerprint: record.fingerprint.clone(),
            reasons: verdict.reasons().to_vec(),
            severity: verdict.severity(),
        }
    }
}

pub struct Notifier {
    client: reqwest::Client,
    config: NotificationConfig,
}

impl Notifier {
    pub fn new(config: NotificationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to build notification HTTP client")?;

        Ok(Self { client, config })
    }

    pub fn should_notify(&self, notification: &BlockNotification) -> bool {
        self.config.enabled
            && !notification.reasons.is_empty()
            && notification.severity >= self.config.min_severity
    }

    /// Deliver in the background; the caller never waits on the webhook
    pub fn spawn_notify(self: &Arc<Self>, notification: BlockNotification) {
        if !self.should_notify(&notification) {
            debug!(severity = %notification.severity, "Notification below threshold, skipped");
            return;
        }

        let notifier = Arc::clone(self);
        tokio::spawn(async move {
            match notifier.deliver(&notification).await {
                Ok(()) => {
                    counter!("warden_notifications_sent_total", 1);
                }
                Err(e) => {
                    warn!(ip = %notification.ip, error = %e, "Failed to deliver block notification");
                    counter!("warden_notification_failures_total", 1);
                }
            }
        });
    }

    pub async fn deliver(&self, notification: &BlockNotification) -> Result<()> {
        if let Some(email) = &self.config.email {
            // no mail transport is configured; the address is only recorded
            info!(
                email = %email,
                ip = %notification.ip,
                severity = %notification.severity,
                "Email notification requested"
            );
        }

        if let Some(url) = &self.config.webhook_url {
            self.client
                .post(url)
                .json(notification)
                .send()
                .await
                .with_context(|| format!("Webhook request to {url} failed"))?
                .error_for_status()
                .context("Webhook rejected notification")?;

            info!(
                ip = %notification.ip,
                reasons = notification.reasons.len(),
                severity = %notification.severity,
                "Block notification delivered"
            );
        }

        Ok(())
    }
}
