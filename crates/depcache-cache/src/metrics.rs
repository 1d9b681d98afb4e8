//! Counters for proxy observability.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Request and fetch counters.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// Requests answered from the cache.
    pub hits: AtomicU64,
    /// Whitelisted requests with no entry.
    pub misses: AtomicU64,
    /// Whitelisted requests whose entry failed revalidation.
    pub stale: AtomicU64,
    /// Requests redirected to the origin without caching.
    pub passthrough: AtomicU64,
    /// Blacklisted requests.
    pub rejected: AtomicU64,
    pub fetches_started: AtomicU64,
    /// Fetches skipped because one was already running.
    pub fetches_deduplicated: AtomicU64,
    pub fetches_committed: AtomicU64,
    pub fetches_aborted: AtomicU64,
    pub fetches_failed: AtomicU64,
    pub bytes_committed: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self, bytes: u64) {
        self.fetches_committed.fetch_add(1, Ordering::Relaxed);
        self.bytes_committed.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            passthrough: self.passthrough.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            fetches_started: self.fetches_started.load(Ordering::Relaxed),
            fetches_deduplicated: self.fetches_deduplicated.load(Ordering::Relaxed),
            fetches_committed: self.fetches_committed.load(Ordering::Relaxed),
            fetches_aborted: self.fetches_aborted.load(Ordering::Relaxed),
            fetches_failed: self.fetches_failed.load(Ordering::Relaxed),
            bytes_committed: self.bytes_committed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CacheMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub stale: u64,
    pub passthrough: u64,
    pub rejected: u64,
    pub fetches_started: u64,
    pub fetches_deduplicated: u64,
    pub fetches_committed: u64,
    pub fetches_aborted: u64,
    pub fetches_failed: u64,
    pub bytes_committed: u64,
}
