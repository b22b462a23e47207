//! Object store gateway.
//!
//! The conversion engine talks to storage only through [`ObjectStore`]. Two
//! backends ship with stillforged:
//!
//! - [`LocalObjectStore`]: buckets are directories under a root directory
//! - [`MemoryObjectStore`]: an in-process store with failure injection

mod local;
mod memory;

pub use local::LocalObjectStore;
pub use memory::{MemoryObjectStore, StoredObject};

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use stillforged_common::{Result, SourceObject};

/// Descriptive metadata attached to uploaded objects.
pub type ObjectMetadata = HashMap<String, String>;

/// Bucket-oriented object storage.
///
/// Implementations must be safe to share across concurrent conversions;
/// every call is independent.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List every object in `bucket` whose key starts with `prefix`.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<SourceObject>>;

    /// Fetch an object's bytes.
    async fn download_object(&self, bucket: &str, key: &str) -> Result<Bytes>;

    /// Store `data` under `key`, replacing any existing object.
    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
        metadata: ObjectMetadata,
    ) -> Result<()>;

    /// Check whether an object exists under exactly `key`.
    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool>;
}
