//! The authoritative source URL → cache entry map.

use crate::entry::{CacheEntry, DEFAULT_COOLDOWN_SECS, SkipReason};
use crate::keys;
use arc_swap::ArcSwap;
use chrono::Duration;
use depcache_core::object::{VALIDATOR_SUFFIX, strip_quotes};
use depcache_core::{Error, ObjectMetadata, ObjectStore, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use url::Url;

type EntryMap = HashMap<String, Arc<CacheEntry>>;

/// Configuration for the cache store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Minimum seconds between two origin probes of one entry.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Public URL of the bucket; clients are redirected below it.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

fn default_cooldown_secs() -> u64 {
    DEFAULT_COOLDOWN_SECS as u64
}

fn default_public_base_url() -> String {
    "https://depcache.s3.amazonaws.com/".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            public_base_url: default_public_base_url(),
        }
    }
}

/// Per-object result of a rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RebuildOutcome {
    Loaded { key: String, url: String },
    Skipped { key: String, reason: SkipReason },
}

/// Everything a rebuild did, object by object.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RebuildReport {
    pub outcomes: Vec<RebuildOutcome>,
}

impl RebuildReport {
    pub fn loaded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, RebuildOutcome::Loaded { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes.len() - self.loaded()
    }
}

/// Marker for an in-flight download. Dropping it clears the marker.
#[must_use = "the download is only marked pending while the guard is alive"]
pub struct PendingDownload<'a> {
    store: &'a CacheStore,
    url: String,
}

impl PendingDownload<'_> {
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for PendingDownload<'_> {
    fn drop(&mut self) {
        self.store.pending_set().remove(&self.url);
    }
}

/// Cached entries plus the set of URLs currently being fetched.
///
/// Readers load the map without locking. A rebuild assembles a new map and
/// swaps it in with a single store; `add` and `delete` copy-update it.
/// Writers hold `writes` from their first backend call until the map is
/// updated, so a rebuild never swaps in a listing older than a commit.
pub struct CacheStore {
    objects: Arc<dyn ObjectStore>,
    entries: ArcSwap<EntryMap>,
    writes: tokio::sync::Mutex<()>,
    pending: Mutex<HashSet<String>>,
    cooldown: Duration,
    public_base: Url,
}

impl CacheStore {
    pub fn new(objects: Arc<dyn ObjectStore>, config: &StoreConfig) -> Result<Self> {
        let public_base = Url::parse(&config.public_base_url).map_err(|e| {
            Error::Config(format!(
                "Invalid public_base_url {}: {}",
                config.public_base_url, e
            ))
        })?;
        if public_base.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "public_base_url {} cannot hold object paths",
                config.public_base_url
            )));
        }
        let cooldown = Duration::from_std(std::time::Duration::from_secs(config.cooldown_secs))
            .map_err(|e| Error::Config(format!("Invalid cooldown: {}", e)))?;

        Ok(Self {
            objects,
            entries: ArcSwap::from_pointee(HashMap::new()),
            writes: tokio::sync::Mutex::new(()),
            pending: Mutex::new(HashSet::new()),
            cooldown,
            public_base,
        })
    }

    /// Replace the map with one built from a full listing of the store.
    ///
    /// Objects that cannot become entries are reported and skipped. Entries
    /// whose object is unchanged keep their revalidation state. If the
    /// listing itself fails the live map is left untouched.
    pub async fn rebuild(&self) -> Result<RebuildReport> {
        let _writes = self.writes.lock().await;
        info!("Rebuilding cache");
        let objects = self.objects.list_all().await?;
        let sidecars: HashSet<&str> = objects
            .iter()
            .filter(|o| o.is_validator_record())
            .map(|o| o.key.as_str())
            .collect();

        let current = self.entries.load_full();
        let mut next = EntryMap::with_capacity(objects.len());
        let mut report = RebuildReport::default();

        for object in &objects {
            let entry = match CacheEntry::from_object(object, self.cooldown) {
                Ok(entry) => entry,
                Err(reason) => {
                    if reason == SkipReason::MissingSourceUrl {
                        warn!(key = %object.key, "Skipping object without source URL");
                    }
                    report.outcomes.push(RebuildOutcome::Skipped {
                        key: object.key.clone(),
                        reason,
                    });
                    continue;
                }
            };

            let sidecar = format!("{}{}", object.key, VALIDATOR_SUFFIX);
            let entry = if entry.validator().is_none() && sidecars.contains(sidecar.as_str()) {
                let validator = self.read_validator(&sidecar).await;
                entry.with_validator(validator)
            } else {
                entry
            };

            let entry = match current.get(entry.source_url()) {
                Some(existing) if is_same_object(existing, &entry) => Arc::clone(existing),
                _ => Arc::new(entry),
            };

            debug!(url = %entry.source_url(), key = %entry.cache_key(), "Loaded cache entry");
            report.outcomes.push(RebuildOutcome::Loaded {
                key: entry.cache_key().to_string(),
                url: entry.source_url().to_string(),
            });
            next.insert(entry.source_url().to_string(), entry);
        }

        let count = next.len();
        self.entries.store(Arc::new(next));
        info!(
            entries = count,
            skipped = report.skipped(),
            "Cache rebuild finished"
        );
        Ok(report)
    }

    async fn read_validator(&self, key: &str) -> Option<String> {
        match self.objects.read(key).await {
            Ok(bytes) => {
                let value = String::from_utf8_lossy(&bytes);
                let value = strip_quotes(&value);
                (!value.is_empty()).then(|| value.to_string())
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read validator record");
                None
            }
        }
    }

    pub fn lookup(&self, url: &str) -> Option<Arc<CacheEntry>> {
        self.entries.load().get(url).cloned()
    }

    /// Upload a downloaded file and insert a fresh entry for it.
    pub async fn add(
        &self,
        url: &str,
        local_file: &Path,
        validator: Option<String>,
    ) -> Result<Arc<CacheEntry>> {
        let key = keys::cache_key(url);
        let metadata = ObjectMetadata::new(url, validator);
        let _writes = self.writes.lock().await;
        self.objects.put_file(&key, local_file, &metadata, true).await?;

        let object = self
            .objects
            .get(&key)
            .await?
            .ok_or_else(|| Error::ObjectNotFound(key.clone()))?;
        let entry = CacheEntry::from_object(&object, self.cooldown).map_err(|reason| {
            Error::Internal(format!("Stored object {} is unusable: {:?}", key, reason))
        })?;

        let entry = Arc::new(entry);
        self.entries.rcu(|map| {
            let mut next = EntryMap::clone(map);
            next.insert(url.to_string(), Arc::clone(&entry));
            next
        });
        info!(url = %url, key = %key, size = entry.size(), "Added to cache");
        Ok(entry)
    }

    /// Remove the entry for `url` and its backing object.
    ///
    /// If the backend delete fails the entry stays, since its object does.
    pub async fn delete(&self, url: &str) -> Result<()> {
        match self.lookup(url) {
            Some(entry) => self.delete_entry(&entry).await.map(|_| ()),
            None => Ok(()),
        }
    }

    /// Remove `entry` and its backing object, but only while it is still the
    /// live entry for its URL. Returns whether anything was deleted.
    ///
    /// A caller holding an entry that has since been replaced leaves the
    /// replacement and its object alone.
    pub async fn delete_entry(&self, entry: &Arc<CacheEntry>) -> Result<bool> {
        let url = entry.source_url();
        let _writes = self.writes.lock().await;
        if !self.lookup(url).is_some_and(|live| Arc::ptr_eq(&live, entry)) {
            debug!(url = %url, "Entry already replaced, not deleting");
            return Ok(false);
        }

        self.objects.delete(entry.cache_key()).await?;
        let sidecar = format!("{}{}", entry.cache_key(), VALIDATOR_SUFFIX);
        if let Err(e) = self.objects.delete(&sidecar).await {
            debug!(key = %sidecar, error = %e, "Failed to delete validator record");
        }

        self.entries.rcu(|map| {
            let mut next = EntryMap::clone(map);
            next.remove(url);
            next
        });
        info!(url = %url, key = %entry.cache_key(), "Deleted from cache");
        Ok(true)
    }

    /// Mark `url` as being downloaded. Returns `None` if it already is.
    pub fn begin_download(&self, url: &str) -> Option<PendingDownload<'_>> {
        if !self.pending_set().insert(url.to_string()) {
            return None;
        }
        Some(PendingDownload {
            store: self,
            url: url.to_string(),
        })
    }

    pub fn is_pending(&self, url: &str) -> bool {
        self.pending_set().contains(url)
    }

    pub fn pending_count(&self) -> usize {
        self.pending_set().len()
    }

    fn pending_set(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// All entries, sorted by source URL.
    pub fn entries(&self) -> Vec<Arc<CacheEntry>> {
        let mut entries: Vec<_> = self.entries.load().values().cloned().collect();
        entries.sort_by(|a, b| a.source_url().cmp(b.source_url()));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }

    /// Public URL clients download a cached entry from.
    pub fn cache_location(&self, entry: &CacheEntry) -> String {
        let mut location = self.public_base.clone();
        if let Ok(mut segments) = location.path_segments_mut() {
            segments.pop_if_empty().extend(entry.cache_key().split('/'));
        }
        location.into()
    }
}

fn is_same_object(existing: &CacheEntry, fresh: &CacheEntry) -> bool {
    existing.cache_key() == fresh.cache_key()
        && existing.stored_modified() == fresh.stored_modified()
        && existing.validator() == fresh.validator()
}
