//! In-process object store.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use stillforged_common::{Error, Result, SourceObject};

use super::{ObjectMetadata, ObjectStore};

/// An object held by [`MemoryObjectStore`].
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: String,
    pub metadata: ObjectMetadata,
    pub last_modified: DateTime<Utc>,
}

/// Object store kept entirely in memory.
///
/// Supports injecting listing and per-key download failures, and counts
/// transfers so callers can assert that nothing was fetched.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    buckets: RwLock<HashMap<String, BTreeMap<String, StoredObject>>>,
    listing_failure: RwLock<Option<String>>,
    failing_downloads: RwLock<HashSet<String>>,
    downloads: AtomicUsize,
    uploads: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place an object directly, bypassing upload accounting.
    pub fn put(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        self.buckets.write().entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            StoredObject {
                data: data.into(),
                content_type: "application/octet-stream".to_string(),
                metadata: ObjectMetadata::new(),
                last_modified: Utc::now(),
            },
        );
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.buckets
            .read()
            .get(bucket)
            .and_then(|objects| objects.get(key).cloned())
    }

    /// Make every subsequent listing fail with `message`.
    pub fn fail_listing(&self, message: impl Into<String>) {
        *self.listing_failure.write() = Some(message.into());
    }

    /// Make downloads of `key` fail.
    pub fn fail_download(&self, key: impl Into<String>) {
        self.failing_downloads.write().insert(key.into());
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<SourceObject>> {
        if let Some(message) = self.listing_failure.read().clone() {
            return Err(Error::store(message));
        }

        let buckets = self.buckets.read();
        let Some(objects) = buckets.get(bucket) else {
            return Err(Error::not_found(format!("bucket {}", bucket)));
        };

        Ok(objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| SourceObject {
                key: key.clone(),
                size: object.data.len() as u64,
                last_modified: object.last_modified,
                etag: None,
            })
            .collect())
    }

    async fn download_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
        if self.failing_downloads.read().contains(key) {
            return Err(Error::store(format!("Simulated download failure for {}", key)));
        }

        let object = self
            .get(bucket, key)
            .ok_or_else(|| Error::not_found(format!("{}/{}", bucket, key)))?;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(object.data)
    }

    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
        metadata: ObjectMetadata,
    ) -> Result<()> {
        self.buckets.write().entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
                metadata,
                last_modified: Utc::now(),
            },
        );
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        Ok(self.get(bucket, key).is_some())
    }
}
