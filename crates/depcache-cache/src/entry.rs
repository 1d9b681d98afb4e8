//! Cache entries and their revalidation state machine.

use crate::keys;
use chrono::{DateTime, Duration, Utc};
use depcache_core::{Origin, ProbeResponse, StoredObject, is_html};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default minimum time between two origin probes for one entry.
pub const DEFAULT_COOLDOWN_SECS: i64 = 60;

/// Result of a consistency check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Fresh,
    Stale,
}

/// Revalidation status of an entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    #[default]
    Unchecked,
    Fresh,
    Stale,
}

/// Why a consistency check reached its verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictReason {
    /// The scheme carries no usable metadata (ftp).
    NotRevalidatable,
    /// Probe errored, timed out, or returned a non-200 status.
    ProbeFailed,
    /// Origin answered with an HTML page instead of the file.
    HtmlResponse,
    ValidatorMatched,
    ValidatorChanged,
    LastModifiedNewer,
    LastModifiedCurrent,
    NoSignal,
}

/// Why an object in the backing store does not become an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The object carries no source URL metadata.
    MissingSourceUrl,
    /// Legacy `<key>.etag` sidecar holding a validator.
    ValidatorRecord,
}

/// Mutable per-entry revalidation bookkeeping.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RevalidationState {
    pub status: EntryStatus,
    pub last_check: Option<DateTime<Utc>>,
    pub last_successful_check: Option<DateTime<Utc>>,
    pub check_count: u64,
    pub consecutive_failures: u64,
    /// Probes that failed and were answered fail-open.
    pub probe_errors: u64,
}

impl RevalidationState {
    /// The cached verdict. Unchecked entries are trusted.
    pub fn verdict(&self) -> Freshness {
        match self.status {
            EntryStatus::Stale => Freshness::Stale,
            EntryStatus::Unchecked | EntryStatus::Fresh => Freshness::Fresh,
        }
    }

    fn is_throttled(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        self.last_check
            .map(|last| now.signed_duration_since(last) < cooldown)
            .unwrap_or(false)
    }

    fn record(&mut self, freshness: Freshness, now: DateTime<Utc>) {
        self.last_check = Some(now);
        self.check_count += 1;
        match freshness {
            Freshness::Fresh => {
                self.status = EntryStatus::Fresh;
                self.last_successful_check = Some(now);
                self.consecutive_failures = 0;
            }
            Freshness::Stale => {
                self.status = EntryStatus::Stale;
                self.consecutive_failures += 1;
            }
        }
    }
}

/// Metadata and revalidation state for one cached object.
#[derive(Debug)]
pub struct CacheEntry {
    source_url: String,
    cache_key: String,
    display_name: String,
    size: u64,
    stored_modified: DateTime<Utc>,
    checksum: String,
    validator: Option<String>,
    cooldown: Duration,
    revalidation: Mutex<RevalidationState>,
}

impl CacheEntry {
    /// Build an entry from a stored object's handle.
    ///
    /// The key is taken from the object, never recomputed from the URL.
    pub fn from_object(object: &StoredObject, cooldown: Duration) -> Result<Self, SkipReason> {
        if object.is_validator_record() {
            return Err(SkipReason::ValidatorRecord);
        }
        let source_url = object
            .metadata
            .source_url
            .clone()
            .ok_or(SkipReason::MissingSourceUrl)?;

        Ok(Self {
            display_name: keys::display_name(&source_url),
            source_url,
            cache_key: object.key.clone(),
            size: object.size,
            stored_modified: object.last_modified,
            checksum: object.checksum.trim_matches('"').to_string(),
            validator: object.metadata.validator.clone(),
            cooldown,
            revalidation: Mutex::new(RevalidationState::default()),
        })
    }

    /// Attach a validator loaded from somewhere other than the object metadata.
    pub fn with_validator(mut self, validator: Option<String>) -> Self {
        if self.validator.is_none() {
            self.validator = validator;
        }
        self
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn stored_modified(&self) -> DateTime<Utc> {
        self.stored_modified
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn validator(&self) -> Option<&str> {
        self.validator.as_deref()
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Snapshot of the revalidation state.
    pub async fn state(&self) -> RevalidationState {
        self.revalidation.lock().await.clone()
    }

    /// Snapshot of the revalidation state, or `None` while a check holds it.
    pub fn try_state(&self) -> Option<RevalidationState> {
        self.revalidation.try_lock().ok().map(|state| state.clone())
    }

    /// Decide whether the cached copy still matches the origin.
    ///
    /// Within the cooldown window the previous verdict is returned without
    /// touching the network. The entry lock is held across the probe, so a
    /// burst of requests for one entry issues a single probe.
    pub async fn check_consistency(&self, origin: &dyn Origin, now: DateTime<Utc>) -> Freshness {
        let mut state = self.revalidation.lock().await;
        if state.is_throttled(now, self.cooldown) {
            debug!(url = %self.source_url, "Consistency check throttled");
            return state.verdict();
        }

        let (freshness, reason) = if !is_revalidatable(&self.source_url) {
            (Freshness::Fresh, VerdictReason::NotRevalidatable)
        } else {
            match origin.probe(&self.source_url).await {
                Ok(probe) => {
                    let verdict = self.evaluate_probe(&probe);
                    if verdict.1 == VerdictReason::ProbeFailed {
                        warn!(
                            url = %self.source_url,
                            status = probe.status,
                            "Probe returned an error status, serving cached file"
                        );
                        state.probe_errors += 1;
                    }
                    verdict
                }
                Err(e) => {
                    warn!(url = %self.source_url, error = %e, "Probe failed, serving cached file");
                    state.probe_errors += 1;
                    (Freshness::Fresh, VerdictReason::ProbeFailed)
                }
            }
        };

        state.record(freshness, now);
        match freshness {
            Freshness::Fresh => debug!(url = %self.source_url, ?reason, "Cached file is fresh"),
            Freshness::Stale => info!(
                url = %self.source_url,
                ?reason,
                failures = state.consecutive_failures,
                "Cached file is stale"
            ),
        }
        freshness
    }

    /// Apply the revalidation policy to a probe response.
    pub fn evaluate_probe(&self, probe: &ProbeResponse) -> (Freshness, VerdictReason) {
        if probe.status != 200 {
            return (Freshness::Fresh, VerdictReason::ProbeFailed);
        }
        if is_html(probe.content_type.as_deref()) {
            return (Freshness::Fresh, VerdictReason::HtmlResponse);
        }

        if let (Some(stored), Some(current)) = (self.validator.as_deref(), probe.etag.as_deref()) {
            if stored == current {
                return (Freshness::Fresh, VerdictReason::ValidatorMatched);
            }
            debug!(url = %self.source_url, old = %stored, new = %current, "ETag changed");
            return (Freshness::Stale, VerdictReason::ValidatorChanged);
        }

        match probe.last_modified {
            Some(modified) if modified > self.stored_modified => {
                (Freshness::Stale, VerdictReason::LastModifiedNewer)
            }
            Some(_) => (Freshness::Fresh, VerdictReason::LastModifiedCurrent),
            None => (Freshness::Fresh, VerdictReason::NoSignal),
        }
    }
}

/// Whether the URL's scheme supports header probes.
pub fn is_revalidatable(url: &str) -> bool {
    !matches!(keys::scheme(url).as_deref(), Some("ftp"))
}
