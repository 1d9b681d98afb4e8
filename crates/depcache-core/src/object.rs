//! Stored object types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata key holding the source URL of a cached object.
pub const META_URL: &str = "url";
/// Metadata key holding the origin validator (ETag) of a cached object.
pub const META_ETAG: &str = "etag";
/// Suffix of legacy sidecar objects that carry a validator.
pub const VALIDATOR_SUFFIX: &str = ".etag";

/// User metadata attached to a stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// The URL the object was downloaded from.
    pub source_url: Option<String>,
    /// Origin ETag captured at download time, quotes stripped.
    pub validator: Option<String>,
}

impl ObjectMetadata {
    pub fn new(source_url: impl Into<String>, validator: Option<String>) -> Self {
        Self {
            source_url: Some(source_url.into()),
            validator,
        }
    }

    /// Encode as the flat string map object stores expect.
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        if let Some(url) = &self.source_url {
            map.insert(META_URL.to_string(), url.clone());
        }
        if let Some(etag) = &self.validator {
            map.insert(META_ETAG.to_string(), etag.clone());
        }
        map
    }

    /// Decode from an object store metadata map. Unknown keys are ignored.
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        Self {
            source_url: map.get(META_URL).filter(|u| !u.is_empty()).cloned(),
            validator: map
                .get(META_ETAG)
                .map(|v| strip_quotes(v).to_string())
                .filter(|v| !v.is_empty()),
        }
    }
}

/// An object as reported by the backing store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredObject {
    /// Key within the bucket.
    pub key: String,
    /// Backend checksum (S3 ETag / SHA-256 for local stores).
    pub checksum: String,
    /// Size in bytes.
    pub size: u64,
    /// When the backend last wrote the object.
    pub last_modified: DateTime<Utc>,
    /// User metadata.
    pub metadata: ObjectMetadata,
}

impl StoredObject {
    /// Whether this is a legacy `<key>.etag` validator record.
    pub fn is_validator_record(&self) -> bool {
        self.key.ends_with(VALIDATOR_SUFFIX) && self.metadata.source_url.is_none()
    }
}

/// Strip surrounding double quotes from an ETag-style value.
pub fn strip_quotes(value: &str) -> &str {
    value.trim().trim_matches('"')
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_metadata_map_keys() {
        let meta = ObjectMetadata::new("https://example.com/a/f.tar.gz", Some("abc123".into()));
        let map = meta.to_map();
        assert_eq!(map.get("url").map(String::as_str), Some("https://example.com/a/f.tar.gz"));
        assert_eq!(map.get("etag").map(String::as_str), Some("abc123"));
        assert_eq!(ObjectMetadata::from_map(&map), meta);
    }

    #[test]
    fn test_metadata_strips_quoted_etag() {
        let mut map = HashMap::new();
        map.insert("url".to_string(), "https://example.com/f".to_string());
        map.insert("etag".to_string(), "\"abc123\"".to_string());
        assert_eq!(ObjectMetadata::from_map(&map).validator.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_metadata_missing_url() {
        let meta = ObjectMetadata::from_map(&HashMap::new());
        assert!(meta.source_url.is_none());
        assert!(meta.validator.is_none());
    }

    #[test]
    fn test_validator_record_detection() {
        let object = StoredObject {
            key: "abcd/f.tar.gz.etag".to_string(),
            checksum: String::new(),
            size: 6,
            last_modified: Utc::now(),
            metadata: ObjectMetadata::default(),
        };
        assert!(object.is_validator_record());
    }
}
