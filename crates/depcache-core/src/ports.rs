//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the cache engine and its
//! external collaborators: the object store holding cached files and the
//! upstream origins they come from.

use crate::Result;
use crate::object::{ObjectMetadata, StoredObject};
use crate::origin::{OriginDownload, ProbeResponse};
use async_trait::async_trait;
use std::path::Path;

/// Durable object storage for cached files.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List every object in the bucket, including user metadata.
    async fn list_all(&self) -> Result<Vec<StoredObject>>;

    /// Upload a local file under `key`.
    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        metadata: &ObjectMetadata,
        public_read: bool,
    ) -> Result<()>;

    /// Fetch the stored-object handle for `key`, if it exists.
    async fn get(&self, key: &str) -> Result<Option<StoredObject>>;

    /// Read the full body of `key`.
    async fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// Delete `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// The upstream hosts cached files come from.
#[async_trait]
pub trait Origin: Send + Sync {
    /// Fetch headers only. Transport errors, timeouts, and any status other
    /// than 200 are errors.
    async fn probe(&self, url: &str) -> Result<ProbeResponse>;

    /// Download `url` into `dest`. Error statuses are returned in the
    /// result, not raised.
    async fn download(&self, url: &str, dest: &Path) -> Result<OriginDownload>;
}
