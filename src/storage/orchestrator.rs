// Storage orchestrator
// The only storage handle the upload pipeline sees. Writes go to the primary
// provider; an optional content-addressed mirror follows along best-effort.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::storage::{
    ObjectInfo, ObjectReader, ProviderKind, PutOptions, StorageError, StorageProvider,
};

pub struct StorageOrchestrator {
    primary: Arc<dyn StorageProvider>,
    mirror: Option<Arc<dyn StorageProvider>>,
    /// When set, mirror writes are spawned instead of awaited.
    async_mirror: bool,
}

impl StorageOrchestrator {
    pub fn new(
        primary: Arc<dyn StorageProvider>,
        mirror: Option<Arc<dyn StorageProvider>>,
        async_mirror: bool,
    ) -> Self {
        Self {
            primary,
            mirror,
            async_mirror,
        }
    }

    pub fn primary_provider(&self) -> ProviderKind {
        self.primary.provider()
    }

    /// A successful return guarantees the object exists in the primary.
    /// Mirror failure never fails the write.
    pub async fn put(
        &self,
        key: &str,
        reader: ObjectReader,
        size: u64,
        opts: PutOptions,
    ) -> Result<(), StorageError> {
        self.primary.put(key, reader, size, opts.clone()).await?;
        self.mirror_object(key, opts).await;
        Ok(())
    }

    pub async fn put_bytes(
        &self,
        key: &str,
        data: Bytes,
        opts: PutOptions,
    ) -> Result<(), StorageError> {
        self.primary.put_bytes(key, data, opts.clone()).await?;
        self.mirror_object(key, opts).await;
        Ok(())
    }

    /// Reads always come from the primary.
    pub async fn get(&self, key: &str) -> Result<ObjectReader, StorageError> {
        self.primary.get(key).await
    }

    pub async fn get_bytes(&self, key: &str) -> Result<Bytes, StorageError> {
        self.primary.get_bytes(key).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.primary.exists(key).await
    }

    pub async fn stat(&self, key: &str) -> Result<ObjectInfo, StorageError> {
        self.primary.stat(key).await
    }

    pub fn url(&self, key: &str) -> String {
        self.primary.url(key)
    }

    pub async fn presigned_url(
        &self,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        self.primary.presigned_url(key, expires_in).await
    }

    /// Delete from the primary synchronously, from the mirror best-effort.
    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.primary.delete(key).await?;

        if let Some(mirror) = &self.mirror {
            let mirror = mirror.clone();
            let key = key.to_string();
            tokio::spawn(async move {
                match mirror.delete(&key).await {
                    Ok(()) | Err(StorageError::NotFound) => {},
                    Err(e) => warn!(key, "mirror delete failed: {}", e),
                }
            });
        }
        Ok(())
    }

    /// Replicate a freshly written object to the mirror. The object is read
    /// back from the primary so streamed bodies do not need to be teed.
    async fn mirror_object(&self, key: &str, opts: PutOptions) {
        let Some(mirror) = &self.mirror else {
            return;
        };

        let primary = self.primary.clone();
        let mirror = mirror.clone();
        let key = key.to_string();

        let task = async move {
            let data = match primary.get_bytes(&key).await {
                Ok(data) => data,
                Err(e) => {
                    warn!(key, "mirror read-back failed: {}", e);
                    return;
                },
            };
            match mirror.put_bytes(&key, data, opts).await {
                Ok(()) => debug!(key, "mirrored object"),
                Err(e) => warn!(key, "mirror write failed: {}", e),
            }
        };

        if self.async_mirror {
            tokio::spawn(task);
        } else {
            task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    use crate::storage::local::LocalStorageProvider;
    use crate::storage::derive_key;

    async fn orchestrator_with_mirror() -> (
        tempfile::TempDir,
        tempfile::TempDir,
        StorageOrchestrator,
        Arc<dyn StorageProvider>,
    ) {
        let primary_dir = tempfile::tempdir().unwrap();
        let mirror_dir = tempfile::tempdir().unwrap();
        let primary: Arc<dyn StorageProvider> =
            Arc::new(LocalStorageProvider::new(primary_dir.path()).await.unwrap());
        let mirror: Arc<dyn StorageProvider> =
            Arc::new(LocalStorageProvider::new(mirror_dir.path()).await.unwrap());

        let orchestrator =
            StorageOrchestrator::new(primary, Some(mirror.clone()), false);
        (primary_dir, mirror_dir, orchestrator, mirror)
    }

    #[tokio::test]
    async fn test_put_reaches_both_stores() {
        let (_p, _m, orchestrator, mirror) = orchestrator_with_mirror().await;
        let key = derive_key(Uuid::new_v4(), Uuid::new_v4(), "thumbnail", "webp");

        orchestrator
            .put_bytes(&key, Bytes::from_static(b"pixels"), PutOptions::default())
            .await
            .unwrap();

        assert!(orchestrator.exists(&key).await.unwrap());
        assert!(mirror.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_removes_primary_and_mirror() {
        let (_p, _m, orchestrator, mirror) = orchestrator_with_mirror().await;
        let key = derive_key(Uuid::new_v4(), Uuid::new_v4(), "small", "webp");

        orchestrator
            .put_bytes(&key, Bytes::from_static(b"pixels"), PutOptions::default())
            .await
            .unwrap();
        orchestrator.delete(&key).await.unwrap();

        assert!(!orchestrator.exists(&key).await.unwrap());

        // Mirror delete is spawned; give it a moment.
        for _ in 0..50 {
            if !mirror.exists(&key).await.unwrap() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("mirror object not deleted");
    }

    #[tokio::test]
    async fn test_primary_only_when_no_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let primary: Arc<dyn StorageProvider> =
            Arc::new(LocalStorageProvider::new(dir.path()).await.unwrap());
        let orchestrator = StorageOrchestrator::new(primary, None, false);

        let key = derive_key(Uuid::new_v4(), Uuid::new_v4(), "original", "jpg");
        orchestrator
            .put_bytes(&key, Bytes::from_static(b"pixels"), PutOptions::default())
            .await
            .unwrap();
        assert!(orchestrator.exists(&key).await.unwrap());
    }
}
