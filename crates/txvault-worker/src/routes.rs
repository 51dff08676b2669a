//! Router configuration.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers::{health, stats};
use crate::state::AppState;

/// Create the worker's operational router.
///
/// # Routes
///
/// - `GET /health` - Liveness check
/// - `GET /stats` - Routing cache and queue counters
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/stats", get(stats::stats))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}
