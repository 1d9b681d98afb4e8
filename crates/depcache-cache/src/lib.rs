//! Caching core for depcache: URL rules, the entry map, and origin fetching.

pub mod classifier;
pub mod entry;
pub mod fetcher;
pub mod handler;
pub mod keys;
pub mod metrics;
pub mod origin;
pub mod provider;
pub mod s3;
pub mod store;

#[cfg(test)]
mod testing;

pub use classifier::{
    Classification, ClassifierRules, PassthroughReason, UrlClassifier, WhitelistRule,
};
pub use entry::{CacheEntry, EntryStatus, Freshness, RevalidationState, SkipReason, VerdictReason};
pub use fetcher::{AbortReason, FetchConfig, FetchOutcome, Fetcher};
pub use handler::{Decision, RedirectKind, RequestHandler};
pub use keys::{cache_key, display_name};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use origin::{HttpOrigin, OriginConfig};
pub use provider::{FilesystemObjectStore, MemoryObjectStore};
pub use s3::{S3ObjectStore, S3Settings};
pub use store::{CacheStore, PendingDownload, RebuildOutcome, RebuildReport, StoreConfig};
