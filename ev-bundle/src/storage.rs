//! Bundle artifact storage
//!
//! The pipeline only consumes an upload/fetch/presign contract. Object
//! stores implement [`StorageAdapter`]; this crate ships a local filesystem
//! adapter and an in-memory one.
//!
//! Keys are `/`-separated relative paths such as
//! `bundles/{tenant}/{bundleId}/manifest.json`. Writes to an existing key
//! overwrite it, which is what makes a re-run bundle job idempotent.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use ev_core::Sha256Digest;

/// Result of a successful upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub size: u64,
    pub sha256: Sha256Digest,
}

/// Time-limited download link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Object storage contract
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Create or overwrite `key`
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> StorageResult<StoredObject>;

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Deleting a missing key is not an error
    async fn delete(&self, key: &str) -> StorageResult<()>;

    async fn presign(&self, key: &str, expires_in: Duration) -> StorageResult<PresignedUrl>;
}

/// Reject empty keys, absolute paths and `..` segments
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.starts_with('/') || key.contains('\\') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    let escapes = Path::new(key)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Local filesystem storage adapter
pub struct LocalStorageAdapter {
    root: PathBuf,
}

impl LocalStorageAdapter {
    /// Create the adapter, creating `root` if needed
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await.map_err(|e| {
            StorageError::Unavailable(format!("Failed to create directory {:?}: {}", root, e))
        })?;
        info!("Initialized local bundle storage at {:?}", root);
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl StorageAdapter for LocalStorageAdapter {
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> StorageResult<StoredObject> {
        let path = self.path_for(key)?;
        debug!(key, content_type, size = data.len(), "Writing object");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::WriteFailed(format!("Failed to create directory: {}", e))
            })?;
        }

        // Write beside the target and rename so readers never see a partial file
        let tmp = path.with_extension("partial");
        let mut file = fs::File::create(&tmp).await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to create file: {}", e))
        })?;
        file.write_all(data).await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to write data: {}", e))
        })?;
        file.sync_all().await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to sync file: {}", e))
        })?;
        fs::rename(&tmp, &path).await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to move file into place: {}", e))
        })?;

        Ok(StoredObject {
            key: key.to_string(),
            size: data.len() as u64,
            sha256: Sha256Digest::hash(data),
        })
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::ReadFailed(format!("{}: {}", key, e))),
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.path_for(key)?;
        fs::try_exists(&path)
            .await
            .map_err(|e| StorageError::ReadFailed(format!("{}: {}", key, e)))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key, "Deleted object");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::WriteFailed(format!("{}: {}", key, e))),
        }
    }

    async fn presign(&self, key: &str, expires_in: Duration) -> StorageResult<PresignedUrl> {
        let path = self.path_for(key)?;
        if !self.exists(key).await? {
            return Err(StorageError::NotFound(key.to_string()));
        }
        let expires_at = Utc::now() + expires_in;
        Ok(PresignedUrl {
            url: format!("file://{}?expires={}", path.display(), expires_at.timestamp()),
            expires_at,
        })
    }
}

/// In-memory storage adapter
///
/// Counts writes so callers can assert that a step touched no storage.
#[derive(Clone, Default)]
pub struct MemoryStorageAdapter {
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    writes: Arc<AtomicU64>,
}

impl MemoryStorageAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `put` and `delete` calls so far
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorageAdapter {
    async fn put(&self, key: &str, data: &[u8], _content_type: &str) -> StorageResult<StoredObject> {
        validate_key(key)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.objects.write().await.insert(key.to_string(), data.to_vec());
        Ok(StoredObject {
            key: key.to_string(),
            size: data.len() as u64,
            sha256: Sha256Digest::hash(data),
        })
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.read().await.contains_key(key))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn presign(&self, key: &str, expires_in: Duration) -> StorageResult<PresignedUrl> {
        if !self.exists(key).await? {
            return Err(StorageError::NotFound(key.to_string()));
        }
        let expires_at = Utc::now() + expires_in;
        Ok(PresignedUrl {
            url: format!("memory://{}?expires={}", key, expires_at.timestamp()),
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_adapter() -> (LocalStorageAdapter, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let adapter = LocalStorageAdapter::new(temp_dir.path()).await.unwrap();
        (adapter, temp_dir)
    }

    #[tokio::test]
    async fn test_put_get_overwrite() {
        let (adapter, _temp) = create_test_adapter().await;
        let key = "bundles/tenant-a/bundle_1/manifest.json";

        let stored = adapter.put(key, b"first", "application/json").await.unwrap();
        assert_eq!(stored.size, 5);
        assert_eq!(stored.sha256, Sha256Digest::hash(b"first"));

        adapter.put(key, b"second", "application/json").await.unwrap();
        assert_eq!(adapter.get(key).await.unwrap(), b"second");
        assert!(!adapter.root().join(key).with_extension("partial").exists());
    }

    #[tokio::test]
    async fn test_missing_object() {
        let (adapter, _temp) = create_test_adapter().await;
        let err = adapter.get("bundles/x/y/manifest.json").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(!adapter.exists("bundles/x/y/manifest.json").await.unwrap());
        adapter.delete("bundles/x/y/manifest.json").await.unwrap();
        assert!(adapter.presign("bundles/x/y/manifest.json", Duration::hours(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_and_presign() {
        let (adapter, _temp) = create_test_adapter().await;
        let key = "bundles/tenant-a/bundle_1/VERIFY.md";
        adapter.put(key, b"# Verify", "text/markdown").await.unwrap();

        let url = adapter.presign(key, Duration::minutes(5)).await.unwrap();
        assert!(url.url.starts_with("file://"));
        assert!(url.expires_at > Utc::now());

        adapter.delete(key).await.unwrap();
        assert!(!adapter.exists(key).await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_cannot_escape_root() {
        let (adapter, _temp) = create_test_adapter().await;
        for key in ["", "/etc/passwd", "bundles/../../etc", "a\\b", "./x"] {
            let err = adapter.put(key, b"x", "text/plain").await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidKey(_)), "{}", key);
        }
    }

    #[tokio::test]
    async fn test_memory_adapter_counts_writes() {
        let adapter = MemoryStorageAdapter::new();
        adapter.put("a/b", b"1", "text/plain").await.unwrap();
        adapter.put("a/b", b"2", "text/plain").await.unwrap();
        adapter.delete("a/b").await.unwrap();
        assert_eq!(adapter.write_count(), 3);
        assert!(adapter.keys().await.is_empty());
    }
}
