//! Blob storage abstraction.
//!
//! Provides a single interface over S3 and the local filesystem with the
//! operations the pipeline needs: list with metadata, get, put, delete,
//! copy and atomic replace.

mod local;
mod s3;
mod url_parser;

pub use local::LocalConfig;
pub use s3::S3Config;
pub use url_parser::BackendConfig;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{Attribute, AttributeValue, Attributes, ObjectStore, PutOptions, PutPayload};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::emit;
use crate::error::StorageError;
use crate::metrics::events::{
    RequestStatus, StorageOperation, StorageRequest, StorageRequestDuration,
};

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<StorageProvider>;

/// One listed object, with its key relative to the provider root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Storage provider that abstracts over different storage backends.
#[derive(Clone)]
pub struct StorageProvider {
    pub(crate) config: BackendConfig,
    pub(crate) object_store: Arc<dyn ObjectStore>,
    pub(crate) canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

impl StorageProvider {
    /// Create a storage provider for the given URL with storage options.
    ///
    /// Fails with [`StorageError::ContainerNotFound`] when a local root
    /// directory does not exist.
    pub async fn for_url_with_options(
        url: &str,
        options: HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        match BackendConfig::parse_url(url)? {
            BackendConfig::S3(config) => Self::construct_s3(config, options).await,
            BackendConfig::Local(config) => Self::construct_local(config).await,
        }
    }

    /// Get the backend configuration.
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    /// Qualify a path with the configured key prefix.
    pub fn qualify_path<'a>(&self, path: &'a Path) -> Cow<'a, Path> {
        match self.config.key() {
            Some(prefix) => Cow::Owned(prefix.parts().chain(path.parts()).collect()),
            None => Cow::Borrowed(path),
        }
    }

    /// List every object under `prefix`, sorted by key.
    ///
    /// Keys are returned relative to the configured base prefix.
    pub async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StorageError> {
        let prefix = Path::from(prefix);
        let full_prefix = self.qualify_path(&prefix);
        let key_part_count = self
            .config
            .key()
            .map(|key| key.parts().count())
            .unwrap_or_default();

        let start = Instant::now();
        let result: Result<Vec<_>, _> = self
            .object_store
            .list(Some(&full_prefix))
            .try_collect()
            .await;
        self.observe(StorageOperation::List, start, result.is_ok());

        let mut entries: Vec<ObjectEntry> = result
            .map_err(|source| self.classify(source))?
            .into_iter()
            .map(|meta| {
                let relative: Path = meta.location.parts().skip(key_part_count).collect();
                ObjectEntry {
                    key: relative.to_string(),
                    size: meta.size,
                    last_modified: meta.last_modified,
                }
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        debug!(prefix = %prefix, count = entries.len(), "Listed objects");
        Ok(entries)
    }

    /// Get the contents of an object.
    pub async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = Path::from(key);
        let start = Instant::now();
        let result = match self.object_store.get(&self.qualify_path(&path)).await {
            Ok(response) => response.bytes().await,
            Err(err) => Err(err),
        };
        self.observe(StorageOperation::Get, start, result.is_ok());

        result.map_err(|source| self.classify(source))
    }

    /// Check whether an object exists.
    pub async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = Path::from(key);
        let start = Instant::now();
        let result = self.object_store.head(&self.qualify_path(&path)).await;
        self.observe(StorageOperation::Head, start, result.is_ok());

        match result.map_err(|source| self.classify(source)) {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Put bytes to a key.
    pub async fn put(&self, key: &str, bytes: impl Into<Bytes>) -> Result<(), StorageError> {
        self.put_with_opts(key, PutPayload::from(bytes.into()), PutOptions::default())
            .await
    }

    /// Put a Parquet file with the correct content type.
    ///
    /// Local filesystem doesn't support attributes, so they are skipped there.
    pub async fn put_parquet(&self, key: &str, bytes: Bytes) -> Result<(), StorageError> {
        if matches!(self.config, BackendConfig::Local(_)) {
            return self.put(key, bytes).await;
        }

        let opts = PutOptions {
            attributes: Attributes::from_iter([(
                Attribute::ContentType,
                AttributeValue::from("application/vnd.apache.parquet"),
            )]),
            ..Default::default()
        };
        self.put_with_opts(key, PutPayload::from(bytes), opts).await
    }

    async fn put_with_opts(
        &self,
        key: &str,
        payload: PutPayload,
        opts: PutOptions,
    ) -> Result<(), StorageError> {
        let path = Path::from(key);
        let start = Instant::now();
        let result = self
            .object_store
            .put_opts(&self.qualify_path(&path), payload, opts)
            .await;
        self.observe(StorageOperation::Put, start, result.is_ok());

        result.map_err(|source| self.classify(source))?;
        Ok(())
    }

    /// Delete the object at `key`.
    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = Path::from(key);
        let start = Instant::now();
        let result = self.object_store.delete(&self.qualify_path(&path)).await;
        self.observe(StorageOperation::Delete, start, result.is_ok());

        result.map_err(|source| self.classify(source))
    }

    /// Server-side copy of `from` to `to`, overwriting the destination.
    pub async fn copy(&self, from: &str, to: &str) -> Result<(), StorageError> {
        let (from, to) = (Path::from(from), Path::from(to));
        let start = Instant::now();
        let result = self
            .object_store
            .copy(&self.qualify_path(&from), &self.qualify_path(&to))
            .await;
        self.observe(StorageOperation::Copy, start, result.is_ok());

        result.map_err(|source| self.classify(source))
    }

    /// Server-side rename (move) operation.
    ///
    /// S3 implements this as `CopyObject` + `DeleteObject`; the local
    /// backend uses `std::fs::rename`.
    pub async fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
        let (from, to) = (Path::from(from), Path::from(to));
        let start = Instant::now();
        let result = self
            .object_store
            .rename(&self.qualify_path(&from), &self.qualify_path(&to))
            .await;
        self.observe(StorageOperation::Rename, start, result.is_ok());

        result.map_err(|source| self.classify(source))
    }

    /// Atomically write content to a key using temp object + rename.
    ///
    /// Readers see either the previous object or the new one, never a
    /// partial write. If the write or rename fails the original is unchanged.
    pub async fn atomic_write(
        &self,
        key: &str,
        content: impl Into<Bytes>,
    ) -> Result<(), StorageError> {
        let temp_key = format!("{key}.tmp");
        self.put(&temp_key, content).await?;
        self.rename(&temp_key, key).await
    }

    fn observe(&self, operation: StorageOperation, start: Instant, ok: bool) {
        let status = if ok {
            RequestStatus::Success
        } else {
            RequestStatus::Error
        };
        emit!(StorageRequest { operation, status });
        emit!(StorageRequestDuration {
            operation,
            duration: start.elapsed(),
        });
    }

    /// Map backend errors, lifting a missing bucket into its own variant.
    fn classify(&self, source: object_store::Error) -> StorageError {
        if mentions_missing_bucket(&source) {
            return StorageError::ContainerNotFound {
                container: self.config.container().to_string(),
            };
        }
        StorageError::ObjectStore { source }
    }
}

fn mentions_missing_bucket(err: &object_store::Error) -> bool {
    let mut current: Option<&dyn std::error::Error> = Some(err);
    while let Some(err) = current {
        if err.to_string().contains("NoSuchBucket") {
            return true;
        }
        current = err.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn provider(dir: &TempDir) -> StorageProvider {
        StorageProvider::for_url_with_options(dir.path().to_str().unwrap(), HashMap::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_local_root_is_container_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("no-such-bucket");

        let err = StorageProvider::for_url_with_options(missing.to_str().unwrap(), HashMap::new())
            .await
            .unwrap_err();

        assert!(err.is_container_missing());
    }

    #[tokio::test]
    async fn test_list_reports_size_and_sorts_by_key() {
        let temp_dir = TempDir::new().unwrap();
        let storage = provider(&temp_dir).await;

        storage
            .put("updated/staff-2.json", b"[{}]".to_vec())
            .await
            .unwrap();
        storage
            .put("updated/staff-1.json", b"[]".to_vec())
            .await
            .unwrap();
        storage
            .put("latest/staff.json", b"[]".to_vec())
            .await
            .unwrap();

        let entries = storage.list("updated").await.unwrap();
        let keys: Vec<_> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["updated/staff-1.json", "updated/staff-2.json"]);
        assert_eq!(entries[1].size, 4);
    }

    #[tokio::test]
    async fn test_get_missing_key_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let storage = provider(&temp_dir).await;

        let err = storage.get("latest/nothing.json").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!storage.exists("latest/nothing.json").await.unwrap());
    }

    #[tokio::test]
    async fn test_copy_then_delete() {
        let temp_dir = TempDir::new().unwrap();
        let storage = provider(&temp_dir).await;

        storage
            .put("updated/design-1.json", b"[1]".to_vec())
            .await
            .unwrap();
        storage
            .copy("updated/design-1.json", "processed_updated/design-1.json")
            .await
            .unwrap();
        storage.delete("updated/design-1.json").await.unwrap();

        assert!(!storage.exists("updated/design-1.json").await.unwrap());
        let copied = storage
            .get("processed_updated/design-1.json")
            .await
            .unwrap();
        assert_eq!(copied.as_ref(), b"[1]");
    }

    #[tokio::test]
    async fn test_atomic_write_replaces_existing() {
        let temp_dir = TempDir::new().unwrap();
        let storage = provider(&temp_dir).await;

        storage
            .atomic_write("latest/staff.json", b"[1]".to_vec())
            .await
            .unwrap();
        storage
            .atomic_write("latest/staff.json", b"[1,2]".to_vec())
            .await
            .unwrap();

        let content = storage.get("latest/staff.json").await.unwrap();
        assert_eq!(content.as_ref(), b"[1,2]");
        assert!(!storage.exists("latest/staff.json.tmp").await.unwrap());
    }
}
