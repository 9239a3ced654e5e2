// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Public endpoints (health) require no
// authentication. All other endpoints require a valid Bearer token checked via
// the `AuthBearer` extractor.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::ingest::SignalCandidate;
use crate::report::weekly_score;
use crate::signal_store::DiscardOutcome;
use crate::types::ChannelInfo;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/signals", get(list_signals))
        .route("/api/v1/signals", post(submit_signal))
        .route("/api/v1/signals/:id", get(get_signal))
        .route("/api/v1/signals/:id/discard", post(discard_signal))
        .route("/api/v1/channels", get(list_channels))
        .route("/api/v1/channels", post(add_channel))
        .route("/api/v1/reports", get(list_reports))
        .route("/api/v1/reports/latest", get(latest_report))
        .route("/api/v1/score", get(current_score))
        .route("/api/v1/errors", get(recent_errors))
        .route("/api/v1/control/pause", post(control_pause))
        .route("/api/v1/control/resume", post(control_resume))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

/// Persist the signal store after a mutating endpoint. Best-effort; a failed
/// flush is logged and recorded but never fails the request.
fn flush_store(state: &AppState) {
    let store_path = state.runtime_config.read().store_path.clone();
    if let Err(e) = state.store.save(&store_path) {
        warn!(error = %e, "failed to flush signal store");
        state.push_error(format!("store flush failed: {e}"));
    }
}

// =============================================================================
// Health (public)
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let now = Utc::now();
    Json(json!({
        "status": "healthy",
        "agent": "tipster",
        "version": env!("CARGO_PKG_VERSION"),
        "paused": state.runtime_config.read().paused,
        "channels_active": state.active_channel_count(),
        "signals_today": state.store.created_today(now),
        "signals_pending": state.store.pending_count(),
        "signals_total": state.store.len(),
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "state_version": state.current_state_version(),
        "server_time": now.timestamp_millis(),
    }))
}

// =============================================================================
// Signals (authenticated)
// =============================================================================

#[derive(Deserialize)]
struct SignalQuery {
    /// Lifecycle state filter, e.g. `PENDING` or `TARGET_HIT`.
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    min_confidence: Option<f64>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn list_signals(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(query): Query<SignalQuery>,
) -> impl IntoResponse {
    let state_filter = query.state.as_deref().map(str::to_uppercase);
    let symbol_filter = query.symbol.as_deref().map(str::to_uppercase);

    let signals: Vec<_> = state
        .store
        .all()
        .into_iter()
        .filter(|s| match &state_filter {
            Some(wanted) => s.state.to_string() == *wanted,
            None => true,
        })
        .filter(|s| match &symbol_filter {
            Some(wanted) => s.symbol == *wanted,
            None => true,
        })
        .filter(|s| match query.min_confidence {
            Some(min) => s.confidence >= min,
            None => true,
        })
        .take(query.limit.unwrap_or(usize::MAX))
        .collect();

    Json(json!({
        "count": signals.len(),
        "signals": signals,
    }))
}

async fn get_signal(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get(&id) {
        Some(sig) => Json(sig).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no signal with id '{id}'") })),
        )
            .into_response(),
    }
}

async fn submit_signal(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(candidate): Json<SignalCandidate>,
) -> impl IntoResponse {
    match state.ingest(&candidate, Utc::now()) {
        Ok(signal) => {
            flush_store(&state);
            (StatusCode::CREATED, Json(signal)).into_response()
        }
        Err(reason) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "code": reason.code(),
                "error": reason.to_string(),
            })),
        )
            .into_response(),
    }
}

async fn discard_signal(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.discard(&id, Utc::now()) {
        DiscardOutcome::Discarded(sig) => {
            info!(id = %sig.id, symbol = %sig.symbol, "signal discarded via API");
            state.increment_version();
            flush_store(&state);
            Json(*sig).into_response()
        }
        DiscardOutcome::AlreadyTerminal => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "signal already has a terminal outcome" })),
        )
            .into_response(),
        DiscardOutcome::NotFound => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no signal with id '{id}'") })),
        )
            .into_response(),
    }
}

// =============================================================================
// Channel directory (authenticated)
// =============================================================================

async fn list_channels(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let channels = state.channels.read().clone();
    Json(json!({
        "count": channels.len(),
        "channels": channels,
    }))
}

async fn add_channel(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(channel): Json<ChannelInfo>,
) -> impl IntoResponse {
    if !state.add_channel(channel.clone()) {
        return (
            StatusCode::CONFLICT,
            Json(json!({
                "error": format!("channel {} already tracked", channel.channel_id),
            })),
        )
            .into_response();
    }

    // Mirror the directory into the config so the channel survives a restart.
    let config_clone = {
        let mut config = state.runtime_config.write();
        config.channels.push(channel.clone());
        config.clone()
    };
    if let Err(e) = config_clone.save(&state.config_path) {
        warn!(error = %e, "failed to save config after channel add");
    }

    (StatusCode::CREATED, Json(channel)).into_response()
}

// =============================================================================
// Reports & score (authenticated)
// =============================================================================

async fn list_reports(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let reports = state.reports.read().clone();
    Json(json!({
        "count": reports.len(),
        "reports": reports,
    }))
}

async fn latest_report(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    match state.latest_report() {
        Some(report) => Json(report).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no report generated yet" })),
        )
            .into_response(),
    }
}

/// The latest generated report's score. Before the first boundary, a
/// provisional score over the trailing 7 days is returned instead.
async fn current_score(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    if let Some(report) = state.latest_report() {
        return Json(json!({
            "score": report.score,
            "signals_scored": report.total_signals,
            "period_start": report.period_start,
            "period_end": report.period_end,
            "provisional": false,
        }));
    }

    let end = Utc::now();
    let start = end - Duration::days(7);
    let terminal = state.store.terminal_in_window(start, end);
    Json(json!({
        "score": weekly_score(&terminal),
        "signals_scored": terminal.len(),
        "period_start": start,
        "period_end": end,
        "provisional": true,
    }))
}

// =============================================================================
// Error log (authenticated)
// =============================================================================

async fn recent_errors(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let errors = state.recent_errors.read().clone();
    Json(json!({
        "count": errors.len(),
        "errors": errors,
    }))
}

// =============================================================================
// Control endpoints (authenticated)
// =============================================================================

async fn control_pause(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    {
        let mut config = state.runtime_config.write();
        config.paused = true;
    }
    state.increment_version();
    info!("Verification PAUSED via API");

    Json(json!({
        "paused": true,
        "message": "Verification paused",
    }))
}

async fn control_resume(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    {
        let mut config = state.runtime_config.write();
        config.paused = false;
    }
    state.increment_version();
    info!("Verification RESUMED via API");

    Json(json!({
        "paused": false,
        "message": "Verification resumed",
    }))
}
