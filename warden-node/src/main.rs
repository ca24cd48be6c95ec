use anyhow::{Context, Result};
use std::net::SocketAddr;
use tracing::{error, info, warn};
use warden_core::WardenConfig;
use warden_node::{create_api_router, telemetry, AppState};

const DEFAULT_CONFIG_PATH: &str = "config/default";

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    // Load configuration from file if available, otherwise use defaults
    let loaded = WardenConfig::from_file(&config_path);
    let config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => WardenConfig::default(),
    };

    // Initialize structured logging
    telemetry::init_tracing(&config.logging);

    info!("Starting Warden Node v{}", env!("CARGO_PKG_VERSION"));
    match loaded {
        Ok(_) => info!(path = %config_path, "Configuration loaded"),
        Err(e) => warn!("Failed to load config file: {}, using defaults", e),
    }

    config
        .validate()
        .context("Invalid configuration")?;

    let listen_addr: SocketAddr = config
        .listen_addr()
        .with_context(|| format!("Invalid listen address {}", config.server.listen_addr))?;

    if config.metrics.enabled {
        let metrics_addr = config
            .metrics_addr()
            .with_context(|| format!("Invalid metrics address {}", config.metrics.listen_addr))?;
        if let Err(e) = telemetry::start_metrics_exporter(metrics_addr) {
            error!(error = %e, "Failed to start metrics server");
        }
    }

    let state = AppState::new(config)?;
    info!(
        backend = state.store.backend(),
        custom_rules = state.pipeline.rule_count(),
        "Visit store and decision pipeline ready"
    );

    // Start retention and session maintenance
    let _maintenance = state.spawn_maintenance_task();

    let app = create_api_router(state);

    info!(listen_addr = %listen_addr, "Starting warden API server");

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {listen_addr}"))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("API server error")?;

    Ok(())
}
