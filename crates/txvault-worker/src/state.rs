//! Application state.

use std::sync::Arc;

use txvault_store::RoutingCache;

use crate::queue::QueueMetrics;

/// State shared with the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// The routing cache.
    pub cache: Arc<RoutingCache>,

    /// Counters of every running queue consumer.
    pub queues: Vec<Arc<QueueMetrics>>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(cache: Arc<RoutingCache>, queues: Vec<Arc<QueueMetrics>>) -> Self {
        Self { cache, queues }
    }
}
