//! S3 (and S3-compatible) object store.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::{ByteStream, DateTime as S3DateTime};
use aws_sdk_s3::types::ObjectCannedAcl;
use chrono::{DateTime, Utc};
use depcache_core::{Error, ObjectMetadata, ObjectStore, Result, StoredObject};
use futures::StreamExt;
use std::path::Path;
use tracing::{debug, info, warn};

/// Concurrent HEAD requests while listing the bucket.
const LIST_HEAD_CONCURRENCY: usize = 16;

/// Connection settings for an S3 bucket.
#[derive(Clone)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, R2).
    pub endpoint: Option<String>,
    pub force_path_style: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
}

/// Object store backed by an S3 bucket.
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(settings: &S3Settings) -> Self {
        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .force_path_style(settings.force_path_style);

        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        match (&settings.access_key_id, &settings.secret_access_key) {
            (Some(key_id), Some(secret)) => {
                builder = builder.credentials_provider(Credentials::new(
                    key_id,
                    secret,
                    settings.session_token.clone(),
                    None,
                    "depcache",
                ));
            }
            _ => warn!(bucket = %settings.bucket, "No S3 credentials configured"),
        }

        info!(bucket = %settings.bucket, region = %settings.region, "Using S3 object store");
        Self {
            client: Client::from_conf(builder.build()),
            bucket: settings.bucket.clone(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

fn to_utc(ts: Option<&S3DateTime>) -> DateTime<Utc> {
    ts.and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
        .unwrap_or_else(Utc::now)
}

fn store_error<E>(action: &str, key: &str, err: E) -> Error
where
    E: std::error::Error,
{
    Error::ObjectStore(format!("{} {}: {}", action, key, DisplayErrorContext(err)))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_all(&self) -> Result<Vec<StoredObject>> {
        let mut listing = vec![];
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| store_error("Failed to list", &self.bucket, e))?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    listing.push(StoredObject {
                        key: key.to_string(),
                        checksum: object.e_tag().unwrap_or_default().to_string(),
                        size: object.size().unwrap_or_default().max(0) as u64,
                        last_modified: to_utc(object.last_modified()),
                        metadata: ObjectMetadata::default(),
                    });
                }
            }
        }
        debug!(bucket = %self.bucket, objects = listing.len(), "Listed bucket");

        // Listings carry no user metadata; fetch it per object.
        let mut objects: Vec<StoredObject> = futures::stream::iter(listing)
            .map(|listed| async move {
                match self.get(&listed.key).await {
                    Ok(Some(object)) => object,
                    Ok(None) => listed,
                    Err(e) => {
                        warn!(key = %listed.key, error = %e, "Failed to load object metadata");
                        listed
                    }
                }
            })
            .buffer_unordered(LIST_HEAD_CONCURRENCY)
            .collect()
            .await;

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        metadata: &ObjectMetadata,
        public_read: bool,
    ) -> Result<()> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| store_error("Failed to open upload for", key, e))?;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .set_metadata(Some(metadata.to_map()));
        if public_read {
            request = request.acl(ObjectCannedAcl::PublicRead);
        }

        request
            .send()
            .await
            .map_err(|e| store_error("Failed to upload", key, e))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match head {
            Ok(out) => Ok(Some(StoredObject {
                key: key.to_string(),
                checksum: out.e_tag().unwrap_or_default().to_string(),
                size: out.content_length().unwrap_or_default().max(0) as u64,
                last_modified: to_utc(out.last_modified()),
                metadata: out
                    .metadata()
                    .map(ObjectMetadata::from_map)
                    .unwrap_or_default(),
            })),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(None),
            Err(e) => Err(store_error("Failed to stat", key, e)),
        }
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let out = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    Error::ObjectNotFound(key.to_string())
                } else {
                    store_error("Failed to download", key, e)
                }
            })?;

        let body = out
            .body
            .collect()
            .await
            .map_err(|e| store_error("Failed to read body of", key, e))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| store_error("Failed to delete", key, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_utc() {
        let ts = S3DateTime::from_secs(1_484_049_600);
        assert_eq!(to_utc(Some(&ts)).timestamp(), 1_484_049_600);
    }
}
