//! Machine-readable cache status.

use axum::{Json, extract::State};
use chrono::Utc;
use depcache_cache::{EntryStatus, MetricsSnapshot, RevalidationState};
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;

#[derive(Serialize)]
pub struct EntryResponse {
    pub url: String,
    pub key: String,
    pub name: String,
    pub size: u64,
    pub modified: String,
    pub validator: Option<String>,
    /// A consistency check is running; revalidation fields are omitted.
    pub checking: bool,
    #[serde(flatten)]
    pub revalidation: Option<RevalidationResponse>,
}

#[derive(Serialize)]
pub struct RevalidationResponse {
    pub status: EntryStatus,
    pub last_check: Option<String>,
    pub check_count: u64,
    pub consecutive_failures: u64,
    pub probe_errors: u64,
}

impl From<RevalidationState> for RevalidationResponse {
    fn from(state: RevalidationState) -> Self {
        Self {
            status: state.status,
            last_check: state.last_check.map(|t| t.to_rfc3339()),
            check_count: state.check_count,
            consecutive_failures: state.consecutive_failures,
            probe_errors: state.probe_errors,
        }
    }
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub uptime_secs: i64,
    pub entries: usize,
    pub pending_downloads: usize,
    pub counters: MetricsSnapshot,
    pub cache: Vec<EntryResponse>,
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let entries = state.store.entries();
    let mut cache = Vec::with_capacity(entries.len());
    for entry in &entries {
        let revalidation = entry.try_state();
        cache.push(EntryResponse {
            url: entry.source_url().to_string(),
            key: entry.cache_key().to_string(),
            name: entry.display_name().to_string(),
            size: entry.size(),
            modified: entry.stored_modified().to_rfc3339(),
            validator: entry.validator().map(str::to_string),
            checking: revalidation.is_none(),
            revalidation: revalidation.map(RevalidationResponse::from),
        });
    }

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        entries: entries.len(),
        pending_downloads: state.store.pending_count(),
        counters: state.metrics.snapshot(),
        cache,
    })
}
