//! Runtime counters.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use txvault_store::CacheStats;

use crate::queue::QueueStats;
use crate::state::AppState;

/// Stats response.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    /// Routing cache counters.
    pub cache: CacheStats,
    /// Per-queue counters.
    pub queues: Vec<QueueStats>,
}

/// Report routing cache and queue counters.
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        cache: state.cache.stats().await,
        queues: state.queues.iter().map(|q| q.snapshot()).collect(),
    })
}
