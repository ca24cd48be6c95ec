//! HTTP surface: telemetry collection plus read-only record and stats queries.

use crate::notify::BlockNotification;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use metrics::counter;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use warden_core::config::{CookieConfig, ServerConfig};
use warden_core::record::UNKNOWN;
use warden_core::storage::BlockedAccess;
use warden_core::{Criteria, SubmissionPayload, TelemetryRecord, Verdict};

/// Create the API router with all endpoints
pub fn create_api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/collect", post(collect))
        .route("/api/v1/records", get(find_records))
        .route("/api/v1/stats", get(statistics))
        .route("/api/v1/health", get(health_check))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn is_cookie_token(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 128
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Correlation id from the request cookie, if present and well-formed
fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| is_cookie_token(value))
}

fn set_cookie_header(config: &CookieConfig, value: &str) -> String {
    let mut cookie = format!(
        "{}={}; Max-Age={}; Path={}; SameSite={}",
        config.name, value, config.lifetime_seconds, config.path, config.same_site
    );
    if config.secure {
        cookie.push_str("; Secure");
    }
    if config.http_only {
        cookie.push_str("; HttpOnly");
    }
    cookie
}

/// Peer address, or the first `X-Forwarded-For` hop when the proxy is trusted
fn client_ip(config: &ServerConfig, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if config.trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty());
        if let Some(hop) = forwarded {
            return hop.to_string();
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn audit_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

fn with_cookie(cookie: String, status: StatusCode, body: Value) -> Response {
    (status, [(header::SET_COOKIE, cookie)], Json(body)).into_response()
}

/// Accept one telemetry submission, persist it and enforce the verdict
#[instrument(skip(state, connect_info, headers, body))]
async fn collect(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    counter!("warden_submissions_total", 1);
    let now = Utc::now();

    let cookie_id = read_cookie(&headers, &state.config.cookie.name)
        .unwrap_or_else(|| format!("trace_{}", Uuid::new_v4().simple()));
    let cookie = set_cookie_header(&state.config.cookie, &cookie_id);

    let ip = client_ip(&state.config.server, &headers, connect_info.map(|ConnectInfo(addr)| addr));
    let ip_info = state.reputation.lookup(&ip).await;

    let payload = SubmissionPayload::from_slice(&body);
    let record = TelemetryRecord::from_submission(
        payload.clone(),
        now,
        cookie_id.clone(),
        ip,
        ip_info,
        audit_headers(&headers),
    );
    let ctx = state.session_context(&cookie_id, now);

    let worker = state.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        worker.store.save(&record)?;
        let verdict = worker.pipeline.evaluate(&record, &ctx);
        if verdict.should_block() {
            if let Err(e) = worker.store.log_blocked(&BlockedAccess::new(&record, &verdict)) {
                warn!(ip = %record.ip, error = %e, "Failed to log blocked access");
                counter!("warden_persistence_failures_total", 1, "operation" => "log_blocked");
            }
        }
        Ok::<(TelemetryRecord, Verdict), warden_core::WardenError>((record, verdict))
    })
    .await;

    let (record, verdict) = match outcome {
        Ok(Ok(evaluated)) => evaluated,
        Ok(Err(e)) => {
            error!(backend = state.store.backend(), error = %e, "Failed to persist submission");
            counter!("warden_persistence_failures_total", 1, "operation" => "save");
            return with_cookie(
                cookie,
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "status": "error", "message": "Failed to store submission" }),
            );
        }
        Err(e) => {
            error!(error = %e, "Submission worker panicked");
            return with_cookie(
                cookie,
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "status": "error", "message": "Failed to store submission" }),
            );
        }
    };

    state.remember(&cookie_id, payload, now);

    if verdict.should_block() {
        counter!("warden_submissions_blocked_total", 1);
        info!(
            ip = %record.ip,
            fingerprint = %record.fingerprint,
            reasons = ?verdict.reason_names(),
            severity = %verdict.severity(),
            "Visitor blocked"
        );
        state
            .notifier
            .spawn_notify(BlockNotification::new(&record, &verdict));

        return with_cookie(
            cookie,
            StatusCode::FORBIDDEN,
            json!({
                "status": "blocked",
                "message": "Access denied",
                "reasons": verdict.reasons(),
                "severity": verdict.severity(),
            }),
        );
    }

    with_cookie(
        cookie,
        StatusCode::OK,
        json!({ "status": "logged", "trace_id": cookie_id }),
    )
}

/// Records whose flat fields equal every query parameter
#[instrument(skip(state))]
async fn find_records(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<TelemetryRecord>>, StatusCode> {
    let criteria: Criteria = params
        .into_iter()
        .map(|(field, value)| (field, Value::String(value)))
        .collect();

    let store = Arc::clone(&state.store);
    match tokio::task::spawn_blocking(move || store.find_by(&criteria)).await {
        Ok(Ok(records)) => Ok(Json(records)),
        Ok(Err(e)) => {
            error!(error = %e, "Failed to query records");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
        Err(e) => {
            error!(error = %e, "Record query panicked");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Aggregate visit statistics
#[instrument(skip(state))]
async fn statistics(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let store = Arc::clone(&state.store);
    let stats = tokio::task::spawn_blocking(move || store.get_stats())
        .await
        .map_err(|e| {
            error!(error = %e, "Statistics task panicked");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!(error = %e, "Failed to compute statistics");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(json!({
        "backend": state.store.backend(),
        "active_sessions": state.sessions.len(),
        "stats": stats,
    })))
}

/// Health check endpoint
#[instrument(skip(state))]
async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "backend": state.store.backend(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}
