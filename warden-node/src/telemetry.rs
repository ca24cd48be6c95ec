//! Logging and Prometheus metrics setup.

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use warden_core::config::{LogFormat, LoggingConfig};

/// Initialize structured logging; `RUST_LOG` overrides the configured level
pub fn init_tracing(config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.level.clone().into());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    match config.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Initialize metrics descriptions
pub fn initialize_metrics() {
    describe_counter!(
        "warden_submissions_total",
        "Total number of telemetry submissions received"
    );
    describe_counter!(
        "warden_submissions_blocked_total",
        "Total number of submissions answered with a block verdict"
    );
    describe_counter!(
        "warden_block_reasons_total",
        "Block reasons triggered, labelled by reason"
    );
    describe_counter!(
        "warden_persistence_failures_total",
        "Visit store operations that failed, labelled by operation"
    );
    describe_counter!(
        "warden_custom_rule_failures_total",
        "Custom rule evaluations that errored or panicked"
    );
    describe_counter!(
        "warden_reputation_lookup_failures_total",
        "IP reputation lookups that failed or timed out"
    );
    describe_counter!(
        "warden_notifications_sent_total",
        "Block notifications delivered"
    );
    describe_counter!(
        "warden_notification_failures_total",
        "Block notifications that could not be delivered"
    );
    describe_counter!(
        "warden_records_purged_total",
        "Visits removed by the retention task"
    );
    describe_gauge!(
        "warden_stored_visits",
        "Visits currently held by the store"
    );
}

/// Install the Prometheus exporter with its own HTTP listener
pub fn start_metrics_exporter(addr: SocketAddr) -> Result<()> {
    info!(metrics_addr = %addr, "Starting Prometheus metrics server");

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    initialize_metrics();
    Ok(())
}
