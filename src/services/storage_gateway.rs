//! Cloud storage gateway - uniform access to the two configured object
//! storage providers.
//!
//! The gateway treats both providers symmetrically and has no fallback
//! preference of its own; callers decide degradation policy. Providers are
//! a closed variant set so a third slot can be added without touching
//! orchestration logic.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::config::{StorageKind, StorageProviderConfig};
use crate::error::{AppError, Result};

/// The configured object-storage provider slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Primary,
    Secondary,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Primary, Provider::Secondary];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Primary => "primary",
            Provider::Secondary => "secondary",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "primary" => Ok(Provider::Primary),
            "secondary" => Ok(Provider::Secondary),
            other => Err(AppError::Validation(format!(
                "Unknown storage provider: {}",
                other
            ))),
        }
    }
}

/// Per-object metadata persisted alongside the artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub tenant_id: Option<Uuid>,
    pub backup_kind: String,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

/// One listed object.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
}

/// Object store trait implemented per provider backend.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store content under a key; all-or-nothing from the caller's view.
    async fn put(&self, key: &str, content: Bytes, metadata: &ObjectMetadata) -> Result<()>;

    /// Retrieve content by key.
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Delete content by key. Idempotent: returns false for an absent key.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// List objects under a key prefix.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>>;
}

/// Filesystem-rooted object store backend.
pub struct FilesystemStore {
    base_path: PathBuf,
}

impl FilesystemStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn key_to_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}.meta.json", key))
    }
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    async fn put(&self, key: &str, content: Bytes, metadata: &ObjectMetadata) -> Result<()> {
        let path = self.key_to_path(key);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write atomically via a uniquely named temp file so a failed upload
        // never leaves a partial object behind and concurrent puts to keys
        // sharing a stem cannot collide
        let temp_path = self.base_path.join(format!("{}.{}.tmp", key, Uuid::new_v4()));
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&content).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &path).await?;

        let meta_json = serde_json::to_vec_pretty(metadata)?;
        fs::write(self.meta_path(key), meta_json).await?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let path = self.key_to_path(key);
        let content = fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::Storage(format!("Object not found: {}", key))
            } else {
                AppError::Storage(e.to_string())
            }
        })?;
        Ok(Bytes::from(content))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        match fs::remove_file(self.key_to_path(key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        match fs::remove_file(self.meta_path(key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(true)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>> {
        let search_path = if prefix.is_empty() {
            self.base_path.clone()
        } else {
            self.key_to_path(prefix)
        };

        let mut entries = Vec::new();
        let mut stack = vec![search_path];

        while let Some(current) = stack.pop() {
            if !current.exists() {
                continue;
            }

            let mut dir = fs::read_dir(&current).await?;
            while let Some(entry) = dir.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if let Ok(relative) = path.strip_prefix(&self.base_path) {
                    let key = relative.to_string_lossy().to_string();
                    // Sidecars and interrupted-upload temp files are not objects
                    if key.ends_with(".meta.json") || key.ends_with(".tmp") {
                        continue;
                    }
                    let size = entry.metadata().await?.len();
                    entries.push(ObjectEntry { key, size });
                }
            }
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}

/// Gateway over the two configured providers.
pub struct StorageGateway {
    primary: Arc<dyn ObjectStore>,
    secondary: Arc<dyn ObjectStore>,
}

impl StorageGateway {
    /// Build both provider backends from config.
    pub async fn from_config(
        primary: &StorageProviderConfig,
        secondary: &StorageProviderConfig,
    ) -> Result<Self> {
        Ok(Self {
            primary: Self::build_store(primary).await?,
            secondary: Self::build_store(secondary).await?,
        })
    }

    /// Create with explicit backends (for testing).
    pub fn new(primary: Arc<dyn ObjectStore>, secondary: Arc<dyn ObjectStore>) -> Self {
        Self { primary, secondary }
    }

    async fn build_store(config: &StorageProviderConfig) -> Result<Arc<dyn ObjectStore>> {
        match config.kind {
            StorageKind::Filesystem => {
                let path = PathBuf::from(&config.root);
                fs::create_dir_all(&path).await?;
                Ok(Arc::new(FilesystemStore::new(path)))
            }
            StorageKind::S3 => Err(AppError::Config(
                "S3 provider kind is reserved but not yet wired; use 'filesystem'".into(),
            )),
        }
    }

    fn store_for(&self, provider: Provider) -> &Arc<dyn ObjectStore> {
        match provider {
            Provider::Primary => &self.primary,
            Provider::Secondary => &self.secondary,
        }
    }

    /// Upload a local file to one provider, returning the opaque location.
    pub async fn upload(
        &self,
        provider: Provider,
        local_path: &std::path::Path,
        object_key: &str,
        metadata: &ObjectMetadata,
    ) -> Result<String> {
        let content = fs::read(local_path).await.map_err(|e| {
            AppError::Storage(format!(
                "Failed to read {} for upload: {}",
                local_path.display(),
                e
            ))
        })?;

        self.store_for(provider)
            .put(object_key, Bytes::from(content), metadata)
            .await
            .map_err(|e| {
                AppError::Storage(format!("Upload to {} failed: {}", provider, e))
            })?;

        Ok(object_key.to_string())
    }

    /// Download an object from one provider to a local destination path.
    pub async fn download(
        &self,
        provider: Provider,
        location: &str,
        dest_path: &std::path::Path,
    ) -> Result<()> {
        let content = self
            .store_for(provider)
            .get(location)
            .await
            .map_err(|e| {
                AppError::Storage(format!("Download from {} failed: {}", provider, e))
            })?;

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(dest_path, &content).await?;
        Ok(())
    }

    /// Delete an object from one provider. Idempotent.
    pub async fn delete(&self, provider: Provider, object_key: &str) -> Result<bool> {
        self.store_for(provider).delete(object_key).await
    }

    /// List objects under a prefix on one provider.
    pub async fn list(&self, provider: Provider, prefix: &str) -> Result<Vec<ObjectEntry>> {
        self.store_for(provider).list(prefix).await
    }

    /// Cheap reachability probe used by health checks.
    pub async fn probe(&self, provider: Provider) -> Result<()> {
        self.store_for(provider).list("").await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_metadata() -> ObjectMetadata {
        ObjectMetadata {
            tenant_id: Some(Uuid::new_v4()),
            backup_kind: "tenant".into(),
            checksum: "deadbeef".into(),
            created_at: Utc::now(),
        }
    }

    async fn create_test_gateway() -> (StorageGateway, TempDir, TempDir) {
        let primary_dir = TempDir::new().unwrap();
        let secondary_dir = TempDir::new().unwrap();
        let gateway = StorageGateway::new(
            Arc::new(FilesystemStore::new(primary_dir.path().to_path_buf())),
            Arc::new(FilesystemStore::new(secondary_dir.path().to_path_buf())),
        );
        (gateway, primary_dir, secondary_dir)
    }

    #[tokio::test]
    async fn test_upload_download_roundtrip() {
        let (gateway, _p, _s) = create_test_gateway().await;
        let scratch = TempDir::new().unwrap();

        let src = scratch.path().join("artifact.bin");
        tokio::fs::write(&src, b"encrypted artifact").await.unwrap();

        let location = gateway
            .upload(Provider::Primary, &src, "backups/t1/a.bin", &test_metadata())
            .await
            .unwrap();

        let dest = scratch.path().join("restored.bin");
        gateway
            .download(Provider::Primary, &location, &dest)
            .await
            .unwrap();

        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"encrypted artifact");
    }

    #[tokio::test]
    async fn test_providers_are_independent() {
        let (gateway, _p, _s) = create_test_gateway().await;
        let scratch = TempDir::new().unwrap();

        let src = scratch.path().join("a.bin");
        tokio::fs::write(&src, b"only primary").await.unwrap();
        gateway
            .upload(Provider::Primary, &src, "k", &test_metadata())
            .await
            .unwrap();

        let dest = scratch.path().join("out.bin");
        let err = gateway.download(Provider::Secondary, "k", &dest).await;
        assert!(matches!(err, Err(AppError::Storage(_))));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (gateway, _p, _s) = create_test_gateway().await;
        let scratch = TempDir::new().unwrap();

        let src = scratch.path().join("a.bin");
        tokio::fs::write(&src, b"data").await.unwrap();
        gateway
            .upload(Provider::Secondary, &src, "del/a.bin", &test_metadata())
            .await
            .unwrap();

        assert!(gateway.delete(Provider::Secondary, "del/a.bin").await.unwrap());
        assert!(!gateway.delete(Provider::Secondary, "del/a.bin").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_excludes_metadata_sidecars() {
        let (gateway, _p, _s) = create_test_gateway().await;
        let scratch = TempDir::new().unwrap();

        let src = scratch.path().join("a.bin");
        tokio::fs::write(&src, b"data").await.unwrap();
        gateway
            .upload(Provider::Primary, &src, "pfx/a.bin", &test_metadata())
            .await
            .unwrap();
        gateway
            .upload(Provider::Primary, &src, "pfx/b.bin", &test_metadata())
            .await
            .unwrap();
        gateway
            .upload(Provider::Primary, &src, "other/c.bin", &test_metadata())
            .await
            .unwrap();

        let listed = gateway.list(Provider::Primary, "pfx").await.unwrap();
        let keys: Vec<_> = listed.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["pfx/a.bin", "pfx/b.bin"]);
        assert!(listed.iter().all(|e| e.size == 4));
    }

    #[tokio::test]
    async fn test_list_ignores_interrupted_upload_temp_files() {
        let (gateway, primary, _s) = create_test_gateway().await;
        let scratch = TempDir::new().unwrap();

        let src = scratch.path().join("a.bin");
        tokio::fs::write(&src, b"data").await.unwrap();
        gateway
            .upload(Provider::Primary, &src, "pfx/a.bin", &test_metadata())
            .await
            .unwrap();

        // Simulate a crash mid-put: a straggler temp file next to the object
        tokio::fs::write(
            primary.path().join(format!("pfx/a.bin.{}.tmp", Uuid::new_v4())),
            b"partial",
        )
        .await
        .unwrap();

        let listed = gateway.list(Provider::Primary, "pfx").await.unwrap();
        let keys: Vec<_> = listed.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["pfx/a.bin"]);
    }

    #[tokio::test]
    async fn test_concurrent_puts_to_keys_sharing_a_stem() {
        let primary_dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(primary_dir.path().to_path_buf());
        let meta = test_metadata();

        let (a, b) = tokio::join!(
            store.put("x.bin", Bytes::from_static(b"binary"), &meta),
            store.put("x.gz", Bytes::from_static(b"gzipped"), &meta),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(store.get("x.bin").await.unwrap(), Bytes::from_static(b"binary"));
        assert_eq!(store.get("x.gz").await.unwrap(), Bytes::from_static(b"gzipped"));
    }

    #[tokio::test]
    async fn test_upload_missing_local_file_is_storage_error() {
        let (gateway, _p, _s) = create_test_gateway().await;
        let err = gateway
            .upload(
                Provider::Primary,
                std::path::Path::new("/nonexistent/file.bin"),
                "k",
                &test_metadata(),
            )
            .await;
        assert!(matches!(err, Err(AppError::Storage(_))));
    }
}
