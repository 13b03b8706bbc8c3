//! HTTP router construction.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::api;
use crate::state::AppState;

/// Build the application router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/stats", get(api::stats))
        .route("/calendar", get(api::events_feed))
        .route("/events", get(api::events_feed))
        .route("/lessons", get(api::lessons_feed))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
