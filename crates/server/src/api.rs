//! Read endpoints: calendar feeds plus health and stats.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use synergia_queue::QueueStats;
use synergia_refresh::{CompiledArtifact, FragmentSummary, RefreshError, RefreshMetrics};

use crate::state::AppState;

const CALENDAR_CONTENT_TYPE: &str = "text/calendar; charset=utf-8";

/// Seconds a client should wait before retrying a not-ready feed.
const RETRY_AFTER_SECS: &str = "30";

// ── Errors ────────────────────────────────────────────────────────

/// Maps refresh failures to HTTP: not ready is 503, anything else 500.
pub struct ApiError(RefreshError);

impl From<RefreshError> for ApiError {
    fn from(e: RefreshError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            RefreshError::NotReady => (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::RETRY_AFTER, RETRY_AFTER_SECS)],
                "Calendar is still loading, try again shortly.",
            )
                .into_response(),
            other => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Calendar unavailable: {other}"),
            )
                .into_response(),
        }
    }
}

fn calendar(artifact: &CompiledArtifact) -> Response {
    (
        [
            (header::CONTENT_TYPE, CALENDAR_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        artifact.document.clone(),
    )
        .into_response()
}

// ── Feeds ─────────────────────────────────────────────────────────

pub async fn events_feed(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let artifact = state.pipeline().events_feed().await?;
    Ok(calendar(&artifact))
}

pub async fn lessons_feed(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let artifact = state.scheduler.lessons_feed().await?;
    Ok(calendar(&artifact))
}

// ── Health & Stats ────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub lessons_ready: bool,
    pub events_cached: bool,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let pipeline = state.pipeline();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        lessons_ready: pipeline.lessons().get().is_some(),
        events_cached: pipeline.events().get().is_some(),
    })
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub config: serde_json::Value,
    pub token_valid: bool,
    pub token_refreshes: u64,
    pub queue: QueueStats,
    pub fragments: Vec<FragmentSummary>,
    pub lessons_compiled_at: Option<DateTime<Utc>>,
    pub events_compiled_at: Option<DateTime<Utc>>,
    pub metrics: RefreshMetrics,
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let pipeline = state.pipeline();
    Json(StatsResponse {
        config: state.config.redacted_summary(),
        token_valid: pipeline.token().is_valid().await,
        token_refreshes: pipeline.token().refresh_count(),
        queue: pipeline.queue_stats(),
        fragments: pipeline.fragments().summaries(),
        lessons_compiled_at: pipeline.lessons().compiled_at(),
        events_compiled_at: pipeline.events().compiled_at(),
        metrics: state.scheduler.metrics(),
    })
}
