//! Object store implementations for local development and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depcache_core::{Error, ObjectMetadata, ObjectStore, Result, StoredObject};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;
use tracing::warn;

/// Metadata record written next to each object by [`FilesystemObjectStore`].
#[derive(Debug, Default, Serialize, Deserialize)]
struct MetaRecord {
    metadata: ObjectMetadata,
    checksum: String,
}

/// Filesystem-backed object store.
///
/// Objects live under `<root>/objects/<key>`, their metadata under
/// `<root>/meta/<key>.json`.
pub struct FilesystemObjectStore {
    root_dir: PathBuf,
}

impl FilesystemObjectStore {
    pub fn new(root_dir: PathBuf) -> Self {
        Self { root_dir }
    }

    fn objects_dir(&self) -> PathBuf {
        self.root_dir.join("objects")
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.objects_dir().join(checked_key(key)?))
    }

    fn meta_path(&self, key: &str) -> Result<PathBuf> {
        checked_key(key)?;
        Ok(self.root_dir.join("meta").join(format!("{}.json", key)))
    }

    /// The metadata record of `key`. A missing record is an empty one.
    async fn read_record(&self, key: &str) -> Result<MetaRecord> {
        match tokio::fs::read(self.meta_path(key)?).await {
            Ok(bytes) => Ok(serde_json::from_slice::<MetaRecord>(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MetaRecord::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn stat(&self, key: &str, path: &Path) -> Result<std::fs::Metadata> {
        tokio::fs::metadata(path)
            .await
            .map_err(|e| Error::ObjectStore(format!("Failed to stat {}: {}", key, e)))
    }

    async fn describe(&self, key: &str, path: &Path) -> Result<StoredObject> {
        let fs_meta = self.stat(key, path).await?;
        let record = self.read_record(key).await?;
        Ok(stored_object(key, &fs_meta, record))
    }
}

fn stored_object(key: &str, fs_meta: &std::fs::Metadata, record: MetaRecord) -> StoredObject {
    let last_modified: DateTime<Utc> = fs_meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    StoredObject {
        key: key.to_string(),
        checksum: record.checksum,
        size: fs_meta.len(),
        last_modified,
        metadata: record.metadata,
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn list_all(&self) -> Result<Vec<StoredObject>> {
        let root = self.objects_dir();
        if !root.exists() {
            return Ok(vec![]);
        }

        let mut keys = vec![];
        let mut pending = vec![root.clone()];
        while let Some(dir) = pending.pop() {
            let mut read_dir = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| Error::ObjectStore(format!("Failed to read dir: {}", e)))?;
            while let Some(entry) = read_dir
                .next_entry()
                .await
                .map_err(|e| Error::ObjectStore(format!("Failed to read entry: {}", e)))?
            {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Ok(relative) = path.strip_prefix(&root) {
                    let key = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    keys.push((key, path));
                }
            }
        }

        // Per-object failures are logged; the listing itself still succeeds.
        let mut objects = Vec::with_capacity(keys.len());
        for (key, path) in keys {
            let fs_meta = match self.stat(&key, &path).await {
                Ok(fs_meta) => fs_meta,
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping object that vanished during listing");
                    continue;
                }
            };
            let record = match self.read_record(&key).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(key = %key, error = %e, "Ignoring unreadable metadata record");
                    MetaRecord::default()
                }
            };
            objects.push(stored_object(&key, &fs_meta, record));
        }
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        metadata: &ObjectMetadata,
        _public_read: bool,
    ) -> Result<()> {
        let object_path = self.object_path(key)?;
        let meta_path = self.meta_path(key)?;
        for parent in [object_path.parent(), meta_path.parent()].into_iter().flatten() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::ObjectStore(format!("Failed to create object dir: {}", e))
            })?;
        }

        tokio::fs::copy(path, &object_path)
            .await
            .map_err(|e| Error::ObjectStore(format!("Failed to store {}: {}", key, e)))?;

        let record = MetaRecord {
            metadata: metadata.clone(),
            checksum: sha256_file(&object_path).await?,
        };
        tokio::fs::write(&meta_path, serde_json::to_vec(&record)?)
            .await
            .map_err(|e| Error::ObjectStore(format!("Failed to write metadata: {}", e)))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        let path = self.object_path(key)?;
        if !path.exists() {
            return Ok(None);
        }
        self.describe(key, &path).await.map(Some)
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(key)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::ObjectNotFound(key.to_string()),
            _ => Error::ObjectStore(format!("Failed to read {}: {}", key, e)),
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        for path in [self.object_path(key)?, self.meta_path(key)?] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(Error::ObjectStore(format!(
                        "Failed to delete {}: {}",
                        key, e
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Reject keys that would escape the store root.
fn checked_key(key: &str) -> Result<&Path> {
    let path = Path::new(key);
    let valid = !key.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if valid {
        Ok(path)
    } else {
        Err(Error::ObjectStore(format!("Invalid object key: {}", key)))
    }
}

async fn sha256_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

struct MemoryObject {
    body: Vec<u8>,
    metadata: ObjectMetadata,
    last_modified: DateTime<Utc>,
    checksum: String,
}

impl MemoryObject {
    fn describe(&self, key: &str) -> StoredObject {
        StoredObject {
            key: key.to_string(),
            checksum: self.checksum.clone(),
            size: self.body.len() as u64,
            last_modified: self.last_modified,
            metadata: self.metadata.clone(),
        }
    }
}

/// In-memory object store.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, MemoryObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw bytes under `key`.
    pub async fn put_bytes(&self, key: &str, body: Vec<u8>, metadata: ObjectMetadata) {
        let object = MemoryObject {
            checksum: hex::encode(Sha256::digest(&body)),
            body,
            metadata,
            last_modified: Utc::now(),
        };
        self.objects.write().await.insert(key.to_string(), object);
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list_all(&self) -> Result<Vec<StoredObject>> {
        let objects = self.objects.read().await;
        Ok(objects.iter().map(|(key, o)| o.describe(key)).collect())
    }

    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        metadata: &ObjectMetadata,
        _public_read: bool,
    ) -> Result<()> {
        let body = tokio::fs::read(path)
            .await
            .map_err(|e| Error::ObjectStore(format!("Failed to read upload: {}", e)))?;
        self.put_bytes(key, body, metadata.clone()).await;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        Ok(self.objects.read().await.get(key).map(|o| o.describe(key)))
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|o| o.body.clone())
            .ok_or_else(|| Error::ObjectNotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }
}
