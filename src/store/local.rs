//! Filesystem-backed object store.
//!
//! Layout under the root directory:
//!
//! ```text
//! {root}/{bucket}/{key}                           object bytes
//! {root}/{bucket}/.stillforged-meta/{key}.json    content type + metadata
//! ```

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use stillforged_common::{Error, Result, SourceObject};
use tokio::fs;
use tracing::warn;
use walkdir::WalkDir;

use super::{ObjectMetadata, ObjectStore};

/// Directory inside each bucket holding upload metadata sidecars.
const META_DIR: &str = ".stillforged-meta";

/// Suffix of in-progress uploads.
const UPLOAD_SUFFIX: &str = ".stillforged-upload";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Sidecar {
    content_type: String,
    metadata: ObjectMetadata,
}

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Create a store whose buckets are subdirectories of `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf> {
        if bucket.is_empty() || bucket.contains('/') || bucket.starts_with('.') {
            return Err(Error::store(format!("Invalid bucket name: {:?}", bucket)));
        }
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.bucket_dir(bucket)?.join(key))
    }

    fn sidecar_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self
            .bucket_dir(bucket)?
            .join(META_DIR)
            .join(format!("{}.json", key)))
    }

    /// Read the metadata recorded for an uploaded object.
    pub async fn read_metadata(&self, bucket: &str, key: &str) -> Result<Option<ObjectMetadata>> {
        let path = self.sidecar_path(bucket, key)?;
        match fs::read_to_string(&path).await {
            Ok(content) => {
                let sidecar: Sidecar = serde_json::from_str(&content)?;
                Ok(Some(sidecar.metadata))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Keys are relative, `/`-separated, and may not escape the bucket.
fn validate_key(key: &str) -> Result<()> {
    let path = Path::new(key);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if key.is_empty() || escapes || key.starts_with(META_DIR) {
        return Err(Error::store(format!("Invalid object key: {:?}", key)));
    }
    Ok(())
}

/// Hex SHA-256 of the file contents, streamed.
fn compute_etag(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Describe one listed file. Unreadable files are logged and left out.
fn describe(path: &Path, key: String) -> Option<SourceObject> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!(key = %key, error = %e, "Skipping object that cannot be stat'ed");
            return None;
        }
    };
    let etag = match compute_etag(path) {
        Ok(etag) => etag,
        Err(e) => {
            warn!(key = %key, error = %e, "Skipping object that cannot be read");
            return None;
        }
    };
    let last_modified: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::from)
        .unwrap_or_else(|_| Utc::now());

    Some(SourceObject {
        etag: Some(etag),
        key,
        size: metadata.len(),
        last_modified,
    })
}

/// Walk the bucket for keys under `prefix`.
///
/// Only files whose key matches are hashed. Entries that cannot be walked,
/// stat'ed, or read are skipped with a warning.
fn list_dir(bucket_dir: &Path, prefix: &str) -> Vec<SourceObject> {
    let mut objects = Vec::new();

    let walker = WalkDir::new(bucket_dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != META_DIR);

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(bucket = %bucket_dir.display(), error = %e, "Skipping unlistable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(bucket_dir) else {
            continue;
        };
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if key.ends_with(UPLOAD_SUFFIX) || !key.starts_with(prefix) {
            continue;
        }

        objects.extend(describe(entry.path(), key));
    }

    objects.sort_by(|a, b| a.key.cmp(&b.key));
    objects
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<SourceObject>> {
        let bucket_dir = self.bucket_dir(bucket)?;
        if !bucket_dir.is_dir() {
            return Err(Error::not_found(format!("bucket {}", bucket)));
        }

        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || list_dir(&bucket_dir, &prefix))
            .await
            .map_err(|e| Error::internal(format!("Listing task failed: {}", e)))
    }

    async fn download_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let path = self.object_path(bucket, key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::not_found(format!("{}/{}", bucket, key)))
            }
            Err(e) => Err(Error::store(format!(
                "Failed to download {}/{}: {}",
                bucket, key, e
            ))),
        }
    }

    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
        metadata: ObjectMetadata,
    ) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        let sidecar_path = self.sidecar_path(bucket, key)?;

        let write = async {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            let mut tmp = path.as_os_str().to_owned();
            tmp.push(UPLOAD_SUFFIX);
            let tmp = PathBuf::from(tmp);
            fs::write(&tmp, &data).await?;
            fs::rename(&tmp, &path).await?;

            if let Some(parent) = sidecar_path.parent() {
                fs::create_dir_all(parent).await?;
            }
            let sidecar = Sidecar {
                content_type: content_type.to_string(),
                metadata,
            };
            fs::write(&sidecar_path, serde_json::to_vec_pretty(&sidecar)?).await?;
            Ok::<_, Error>(())
        };

        write.await.map_err(|e| {
            Error::store(format!("Failed to upload {}/{}: {}", bucket, key, e))
        })
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        let path = self.object_path(bucket, key)?;
        match fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::store(format!(
                "Failed to check {}/{}: {}",
                bucket, key, e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, LocalObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("images/2024/summer")).unwrap();
        std::fs::write(dir.path().join("images/2024/summer/beach.jpg"), b"jpegdata").unwrap();
        std::fs::write(dir.path().join("images/2024/cover.png"), b"png").unwrap();
        std::fs::write(dir.path().join("images/readme.txt"), b"hello").unwrap();
        let store = LocalObjectStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_list_with_prefix() {
        let (dir, store) = setup();

        let all = store.list_objects("images", "").await.unwrap();
        let keys: Vec<_> = all.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["2024/cover.png", "2024/summer/beach.jpg", "readme.txt"]);
        assert_eq!(all[1].size, 8);
        let beach = dir.path().join("images/2024/summer/beach.jpg");
        assert_eq!(all[1].etag, Some(compute_etag(&beach).unwrap()));
        assert_eq!(all[1].etag.as_ref().map(|e| e.len()), Some(64));

        let summer = store.list_objects("images", "2024/summer").await.unwrap();
        assert_eq!(summer.len(), 1);
    }

    #[test]
    fn test_etag_is_sha256_of_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"hello").unwrap();
        assert_eq!(
            compute_etag(&path).unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_file_is_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let (dir, store) = setup();
        let locked = dir.path().join("images/2024/locked.png");
        std::fs::write(&locked, b"png").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
        // Privileged users read through permission bits.
        let readable = std::fs::File::open(&locked).is_ok();

        let listed = store.list_objects("images", "2024/").await.unwrap();
        let keys: Vec<_> = listed.iter().map(|o| o.key.as_str()).collect();
        if readable {
            assert_eq!(keys, vec!["2024/cover.png", "2024/locked.png", "2024/summer/beach.jpg"]);
        } else {
            assert_eq!(keys, vec!["2024/cover.png", "2024/summer/beach.jpg"]);
        }
    }

    #[tokio::test]
    async fn test_missing_bucket_is_error() {
        let (_dir, store) = setup();
        let err = store.list_objects("nope", "").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_upload_download_and_metadata() {
        let (_dir, store) = setup();

        let mut metadata = ObjectMetadata::new();
        metadata.insert("original-format".into(), "jpeg".into());
        store
            .upload_object(
                "images",
                "2024/summer/beach.webp",
                Bytes::from_static(b"webpdata"),
                "image/webp",
                metadata,
            )
            .await
            .unwrap();

        assert!(store.object_exists("images", "2024/summer/beach.webp").await.unwrap());
        assert!(!store.object_exists("images", "2024/summer/beach").await.unwrap());
        let data = store
            .download_object("images", "2024/summer/beach.webp")
            .await
            .unwrap();
        assert_eq!(&data[..], b"webpdata");

        let metadata = store
            .read_metadata("images", "2024/summer/beach.webp")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metadata["original-format"], "jpeg");

        // Sidecars and temp files never show up as objects.
        let listed = store.list_objects("images", "").await.unwrap();
        assert_eq!(listed.len(), 4);
        assert!(listed.iter().all(|o| !o.key.starts_with(META_DIR)));
    }

    #[tokio::test]
    async fn test_download_missing_object() {
        let (_dir, store) = setup();
        let err = store.download_object("images", "absent.jpg").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let (_dir, store) = setup();
        assert!(store.download_object("images", "../secret").await.is_err());
        assert!(store.object_exists("images", "/etc/passwd").await.is_err());
        assert!(store.download_object("../images", "a.jpg").await.is_err());
    }
}
