//! Per-request routing decision.

use crate::classifier::{Classification, UrlClassifier};
use crate::entry::Freshness;
use crate::fetcher::Fetcher;
use crate::metrics::CacheMetrics;
use crate::store::CacheStore;
use chrono::Utc;
use depcache_core::Origin;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// 301
    Permanent,
    /// 302
    Temporary,
}

/// What to answer a client with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    NotFound,
    Redirect { location: String, kind: RedirectKind },
}

impl Decision {
    fn permanent(location: impl Into<String>) -> Self {
        Self::Redirect {
            location: location.into(),
            kind: RedirectKind::Permanent,
        }
    }

    fn temporary(location: impl Into<String>) -> Self {
        Self::Redirect {
            location: location.into(),
            kind: RedirectKind::Temporary,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::Redirect {
                kind: RedirectKind::Permanent,
                ..
            } => 301,
            Self::Redirect {
                kind: RedirectKind::Temporary,
                ..
            } => 302,
        }
    }

    pub fn location(&self) -> Option<&str> {
        match self {
            Self::NotFound => None,
            Self::Redirect { location, .. } => Some(location),
        }
    }
}

/// Classify, look up, and revalidate a requested URL.
pub struct RequestHandler {
    classifier: UrlClassifier,
    store: Arc<CacheStore>,
    fetcher: Arc<Fetcher>,
    origin: Arc<dyn Origin>,
    metrics: Arc<CacheMetrics>,
}

impl RequestHandler {
    pub fn new(
        classifier: UrlClassifier,
        store: Arc<CacheStore>,
        fetcher: Arc<Fetcher>,
        origin: Arc<dyn Origin>,
        metrics: Arc<CacheMetrics>,
    ) -> Self {
        Self {
            classifier,
            store,
            fetcher,
            origin,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    pub async fn handle(&self, requested: &str) -> Decision {
        let url = UrlClassifier::canonicalize(requested);

        match self.classifier.classify(requested) {
            Classification::Reject => {
                CacheMetrics::incr(&self.metrics.rejected);
                info!(url = %url, "Rejected blacklisted URL");
                Decision::NotFound
            }
            Classification::Passthrough(reason) => {
                CacheMetrics::incr(&self.metrics.passthrough);
                debug!(url = %url, ?reason, "Passing through to origin");
                Decision::permanent(url)
            }
            Classification::Cacheable => self.handle_cacheable(url).await,
        }
    }

    async fn handle_cacheable(&self, url: &str) -> Decision {
        let Some(entry) = self.store.lookup(url) else {
            CacheMetrics::incr(&self.metrics.misses);
            info!(url = %url, "Cache miss");
            self.start_fetch(url);
            return Decision::temporary(url);
        };

        match entry.check_consistency(self.origin.as_ref(), Utc::now()).await {
            Freshness::Fresh => {
                CacheMetrics::incr(&self.metrics.hits);
                let location = self.store.cache_location(&entry);
                debug!(url = %url, location = %location, "Cache hit");
                Decision::permanent(location)
            }
            Freshness::Stale => {
                CacheMetrics::incr(&self.metrics.stale);
                // Only the entry that was checked; a newer commit stays.
                if let Err(e) = self.store.delete_entry(&entry).await {
                    warn!(url = %url, error = %e, "Failed to delete stale entry");
                }
                self.start_fetch(url);
                Decision::temporary(url)
            }
        }
    }

    fn start_fetch(&self, url: &str) {
        if self.store.is_pending(url) {
            CacheMetrics::incr(&self.metrics.fetches_deduplicated);
            debug!(url = %url, "Download already in progress");
            return;
        }
        // Detached; the outcome is logged by the fetcher.
        drop(self.fetcher.spawn(url.to_string()));
    }
}
