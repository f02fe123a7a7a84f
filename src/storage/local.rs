// Local filesystem storage provider
// Objects live under a configured root directory; keys are validated before
// they are joined onto the root, which keeps every path inside the prefix.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::storage::{
    key::validate_key, ObjectInfo, ObjectReader, ProviderKind, PutOptions, StorageError,
    StorageProvider,
};

pub struct LocalStorageProvider {
    root: PathBuf,
}

impl LocalStorageProvider {
    /// Create a provider rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StorageError::Provider(format!("create storage root: {}", e)))?;
        Ok(Self { root })
    }

    /// Join a validated key onto the root. Validation guarantees the key has
    /// no traversal segments, so the result cannot escape the prefix.
    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    async fn ensure_parent(path: &Path) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Provider(format!("create object directory: {}", e)))?;
        }
        Ok(())
    }

    fn map_io_error(e: std::io::Error) -> StorageError {
        match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound,
            std::io::ErrorKind::PermissionDenied => StorageError::AccessDenied,
            _ => StorageError::Provider(e.to_string()),
        }
    }
}

#[async_trait]
impl StorageProvider for LocalStorageProvider {
    async fn put(
        &self,
        key: &str,
        mut reader: ObjectReader,
        size: u64,
        _opts: PutOptions,
    ) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        Self::ensure_parent(&path).await?;

        // Write to a temporary sibling first so a failed write never leaves a
        // truncated object behind.
        let tmp = path.with_extension("partial");
        let mut file = fs::File::create(&tmp)
            .await
            .map_err(Self::map_io_error)?;

        let written = tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(Self::map_io_error)?;
        file.flush().await.map_err(Self::map_io_error)?;
        drop(file);

        if written != size {
            let _ = fs::remove_file(&tmp).await;
            return Err(StorageError::Provider(format!(
                "size mismatch: expected {} bytes, wrote {}",
                size, written
            )));
        }

        fs::rename(&tmp, &path).await.map_err(Self::map_io_error)
    }

    async fn put_bytes(
        &self,
        key: &str,
        data: Bytes,
        opts: PutOptions,
    ) -> Result<(), StorageError> {
        let size = data.len() as u64;
        let reader: ObjectReader = Box::pin(std::io::Cursor::new(data));
        self.put(key, reader, size, opts).await
    }

    async fn get(&self, key: &str) -> Result<ObjectReader, StorageError> {
        let path = self.path_for(key)?;
        let file = fs::File::open(&path).await.map_err(Self::map_io_error)?;
        Ok(Box::pin(file))
    }

    async fn get_bytes(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = self.path_for(key)?;
        let data = fs::read(&path).await.map_err(Self::map_io_error)?;
        Ok(Bytes::from(data))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                // Prune now-empty parent directories best-effort; leftover
                // empty directories are harmless but untidy.
                if let Some(parent) = path.parent() {
                    if fs::remove_dir(parent).await.is_err() {
                        // Non-empty or already gone.
                    }
                }
                Ok(())
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound),
            Err(e) => Err(Self::map_io_error(e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::map_io_error(e)),
        }
    }

    fn url(&self, _key: &str) -> String {
        // Local objects are served through the API, not by URL.
        String::new()
    }

    async fn presigned_url(
        &self,
        _key: &str,
        _expires_in: Duration,
    ) -> Result<String, StorageError> {
        Err(StorageError::NotSupported)
    }

    async fn stat(&self, key: &str) -> Result<ObjectInfo, StorageError> {
        let path = self.path_for(key)?;
        let meta = fs::metadata(&path).await.map_err(Self::map_io_error)?;

        let last_modified = meta
            .modified()
            .ok()
            .map(DateTime::<Utc>::from);

        let content_type = path
            .extension()
            .and_then(|e| e.to_str())
            .map(content_type_for_extension)
            .map(str::to_string);

        if last_modified.is_none() {
            warn!("filesystem did not report mtime for {}", key);
        }

        Ok(ObjectInfo {
            key: key.to_string(),
            size: meta.len(),
            content_type,
            last_modified,
        })
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::Local
    }
}

fn content_type_for_extension(ext: &str) -> &'static str {
    match ext {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}
