//! Background download of uncached files.

use crate::metrics::CacheMetrics;
use crate::store::CacheStore;
use depcache_core::{Error, Origin, Result, is_html};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Configuration for the fetcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Downloads smaller than this are error pages, not files.
    #[serde(default = "default_min_size_bytes")]
    pub min_size_bytes: u64,
    /// Directory for in-flight downloads. Defaults to the system temp dir.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

fn default_min_size_bytes() -> u64 {
    1024
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            min_size_bytes: default_min_size_bytes(),
            scratch_dir: None,
        }
    }
}

/// Why a completed download was discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    HtmlResponse,
    TooSmall { size: u64, min: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Committed { size: u64 },
    /// Another fetch of the same URL was already running.
    AlreadyPending,
    Aborted(AbortReason),
    Failed(String),
}

/// Downloads origin files and commits them to the cache.
pub struct Fetcher {
    store: Arc<CacheStore>,
    origin: Arc<dyn Origin>,
    config: FetchConfig,
    metrics: Arc<CacheMetrics>,
}

impl Fetcher {
    pub fn new(
        store: Arc<CacheStore>,
        origin: Arc<dyn Origin>,
        config: FetchConfig,
        metrics: Arc<CacheMetrics>,
    ) -> Self {
        Self {
            store,
            origin,
            config,
            metrics,
        }
    }

    /// Run [`Fetcher::fetch`] on a detached task.
    pub fn spawn(self: &Arc<Self>, url: String) -> JoinHandle<FetchOutcome> {
        let fetcher = Arc::clone(self);
        tokio::spawn(async move { fetcher.fetch(&url).await })
    }

    /// Download `url` and add it to the cache.
    ///
    /// At most one fetch per URL runs at a time. The pending marker and the
    /// scratch file are released however this returns.
    pub async fn fetch(&self, url: &str) -> FetchOutcome {
        let Some(_pending) = self.store.begin_download(url) else {
            CacheMetrics::incr(&self.metrics.fetches_deduplicated);
            debug!(url = %url, "Download already in progress");
            return FetchOutcome::AlreadyPending;
        };

        CacheMetrics::incr(&self.metrics.fetches_started);
        info!(url = %url, "Downloading");
        let outcome = self
            .download_and_commit(url)
            .await
            .unwrap_or_else(|e| FetchOutcome::Failed(e.to_string()));

        match &outcome {
            FetchOutcome::Committed { size } => {
                self.metrics.record_commit(*size);
                info!(url = %url, size, "Download committed");
            }
            FetchOutcome::Aborted(reason) => {
                CacheMetrics::incr(&self.metrics.fetches_aborted);
                warn!(url = %url, ?reason, "Download discarded");
            }
            FetchOutcome::Failed(message) => {
                CacheMetrics::incr(&self.metrics.fetches_failed);
                error!(url = %url, error = %message, "Download failed");
            }
            FetchOutcome::AlreadyPending => {}
        }
        outcome
    }

    async fn download_and_commit(&self, url: &str) -> Result<FetchOutcome> {
        let scratch = self.scratch_file()?;
        let download = self.origin.download(url, &scratch).await?;

        if !download.is_success() {
            return Ok(FetchOutcome::Failed(format!(
                "Received HTTP {} for {}",
                download.status, url
            )));
        }
        if is_html(download.content_type.as_deref()) {
            return Ok(FetchOutcome::Aborted(AbortReason::HtmlResponse));
        }
        if download.size < self.config.min_size_bytes {
            return Ok(FetchOutcome::Aborted(AbortReason::TooSmall {
                size: download.size,
                min: self.config.min_size_bytes,
            }));
        }

        self.store.add(url, &scratch, download.etag).await?;
        Ok(FetchOutcome::Committed {
            size: download.size,
        })
    }

    fn scratch_file(&self) -> Result<tempfile::TempPath> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("depcache-");
        let file = match &self.config.scratch_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| Error::Internal(format!("Failed to create scratch file: {}", e)))?;
        Ok(file.into_temp_path())
    }
}
