//! Application state shared across handlers.

use chrono::{DateTime, Utc};
use depcache_cache::{CacheMetrics, CacheStore, RequestHandler};
use std::sync::Arc;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<RequestHandler>,
    pub store: Arc<CacheStore>,
    pub metrics: Arc<CacheMetrics>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(handler: Arc<RequestHandler>) -> Self {
        Self {
            store: Arc::clone(handler.store()),
            metrics: Arc::clone(handler.metrics()),
            handler,
            started_at: Utc::now(),
        }
    }
}
