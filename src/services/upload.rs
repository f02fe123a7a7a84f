// Upload pipeline
// validate -> create aggregate -> process -> store variants -> activate.
// The aggregate is only ever observable as `processing`, `active` or
// `deleted`; any mid-pipeline failure cleans up written objects and parks
// the aggregate in `deleted` with the originating error surfaced.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::join_all;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::DieselPool;
use crate::imaging::processor::{ImageProcessor, ProcessedVariant, ProcessingError};
use crate::imaging::validator::{ImageValidator, ValidationError};
use crate::models::image::{
    Image, ImageError, ImageStatus, ImageVariantRow, ImageVisibility, NewImage, NewImageVariant,
};
use crate::storage::{derive_key, PutOptions, StorageError, StorageOrchestrator};
use crate::utils::problem::ApiError;
use crate::utils::validation::normalize_tag;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Repository error: {0}")]
    Repository(#[from] ImageError),
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Validation(e) => e.into(),
            UploadError::Processing(e) => e.into(),
            UploadError::Storage(e) => e.into(),
            UploadError::Repository(ImageError::NotFound) => ApiError::NotFound,
            UploadError::Repository(e) => ApiError::Internal(e.to_string()),
        }
    }
}

/// Persistence seam for the image aggregate. The pipeline never talks to
/// the database directly, which keeps it testable against an in-memory
/// implementation.
#[async_trait]
pub trait ImageRepository: Send + Sync {
    async fn create_image(&self, image: NewImage) -> Result<Image, ImageError>;

    async fn attach_variant(&self, variant: NewImageVariant)
        -> Result<ImageVariantRow, ImageError>;

    async fn set_status(&self, image_id: Uuid, status: ImageStatus) -> Result<(), ImageError>;

    async fn set_tags(&self, image_id: Uuid, slugs: &[String]) -> Result<(), ImageError>;

    async fn variants(&self, image_id: Uuid) -> Result<Vec<ImageVariantRow>, ImageError>;
}

/// Diesel-backed repository used in production.
pub struct DieselImageRepository {
    db_pool: DieselPool,
}

impl DieselImageRepository {
    pub fn new(db_pool: DieselPool) -> Self {
        Self { db_pool }
    }

    async fn conn(
        &self,
    ) -> Result<
        bb8::PooledConnection<
            '_,
            diesel_async::pooled_connection::AsyncDieselConnectionManager<
                diesel_async::AsyncPgConnection,
            >,
        >,
        ImageError,
    > {
        self.db_pool
            .get()
            .await
            .map_err(|e| ImageError::Database(diesel::result::Error::QueryBuilderError(
                e.to_string().into(),
            )))
    }
}

#[async_trait]
impl ImageRepository for DieselImageRepository {
    async fn create_image(&self, image: NewImage) -> Result<Image, ImageError> {
        let mut conn = self.conn().await?;
        Image::create(&mut conn, image).await
    }

    async fn attach_variant(
        &self,
        variant: NewImageVariant,
    ) -> Result<ImageVariantRow, ImageError> {
        let mut conn = self.conn().await?;
        Image::attach_variant(&mut conn, variant).await
    }

    async fn set_status(&self, image_id: Uuid, status: ImageStatus) -> Result<(), ImageError> {
        let mut conn = self.conn().await?;
        Image::set_status(&mut conn, image_id, status).await
    }

    async fn set_tags(&self, image_id: Uuid, slugs: &[String]) -> Result<(), ImageError> {
        let mut conn = self.conn().await?;
        Image::set_tags(&mut conn, image_id, slugs).await
    }

    async fn variants(&self, image_id: Uuid) -> Result<Vec<ImageVariantRow>, ImageError> {
        let mut conn = self.conn().await?;
        Image::variants(&mut conn, image_id).await
    }
}

/// Caller-supplied metadata for an upload.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub visibility: Option<ImageVisibility>,
    pub tags: Vec<String>,
}

/// Result of a completed upload.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub image: Image,
    pub variants: Vec<ImageVariantRow>,
    pub tags: Vec<String>,
}

pub struct UploadService {
    validator: Arc<ImageValidator>,
    processor: Arc<ImageProcessor>,
    storage: Arc<StorageOrchestrator>,
    repository: Arc<dyn ImageRepository>,
}

impl UploadService {
    pub fn new(
        validator: Arc<ImageValidator>,
        processor: Arc<ImageProcessor>,
        storage: Arc<StorageOrchestrator>,
        repository: Arc<dyn ImageRepository>,
    ) -> Self {
        Self {
            validator,
            processor,
            storage,
            repository,
        }
    }

    /// Run the full pipeline for one authenticated upload. Rate limiting
    /// happens upstream; a rejected request never reaches this point.
    pub async fn upload(
        &self,
        owner_id: Uuid,
        data: Bytes,
        declared_filename: &str,
        request: UploadRequest,
    ) -> Result<UploadedImage, UploadError> {
        // Nothing is processed or persisted until validation passes.
        let validated = self.validator.validate(&data, declared_filename).await?;

        let image_id = Uuid::new_v4();
        let original_key = derive_key(owner_id, image_id, "original", validated.mime_type);

        let image = self
            .repository
            .create_image(NewImage {
                id: image_id,
                owner_id,
                status: ImageStatus::Processing.as_str().to_string(),
                visibility: request
                    .visibility
                    .unwrap_or(ImageVisibility::Public)
                    .as_str()
                    .to_string(),
                title: request.title.clone(),
                description: request.description.clone(),
                mime_type: validated.mime_type.to_string(),
                file_size: validated.size as i64,
                width: validated.width as i32,
                height: validated.height as i32,
                original_filename: validated.display_filename.clone(),
                storage_key: original_key,
                storage_provider: self.storage.primary_provider().as_str().to_string(),
            })
            .await?;

        match self.process_and_store(&image, data, &request).await {
            Ok((variants, tags)) => {
                info!(
                    image_id = %image.id,
                    owner_id = %owner_id,
                    variants = variants.len(),
                    "upload complete"
                );
                Ok(UploadedImage {
                    image: Image {
                        status: ImageStatus::Active.as_str().to_string(),
                        ..image
                    },
                    variants,
                    tags,
                })
            },
            Err(err) => {
                self.abandon_upload(&image).await;
                Err(err)
            },
        }
    }

    async fn process_and_store(
        &self,
        image: &Image,
        data: Bytes,
        request: &UploadRequest,
    ) -> Result<(Vec<ImageVariantRow>, Vec<String>), UploadError> {
        let processed = self.processor.process(data).await?;

        // Variant writes are independent; run them concurrently. The upload
        // succeeds only if every one of them lands.
        let puts = processed.iter().map(|variant| {
            let key = self.variant_key(image, variant);
            let opts = PutOptions::for_variant(variant.content_type);
            let storage = self.storage.clone();
            let data = variant.data.clone();
            async move { storage.put_bytes(&key, data, opts).await }
        });
        for result in join_all(puts).await {
            result?;
        }

        let mut rows = Vec::with_capacity(processed.len());
        for variant in &processed {
            let row = self
                .repository
                .attach_variant(NewImageVariant {
                    image_id: image.id,
                    variant: variant.variant.as_str().to_string(),
                    storage_key: self.variant_key(image, variant),
                    width: variant.width as i32,
                    height: variant.height as i32,
                    file_size: variant.data.len() as i64,
                    format: variant.format.to_string(),
                })
                .await?;
            rows.push(row);
        }

        let tags: Vec<String> = request
            .tags
            .iter()
            .filter_map(|t| normalize_tag(t))
            .collect();
        if !tags.is_empty() {
            self.repository.set_tags(image.id, &tags).await?;
        }

        // The aggregate goes active only after every declared variant is
        // persisted in both stores.
        self.repository
            .set_status(image.id, ImageStatus::Active)
            .await?;

        Ok((rows, tags))
    }

    fn variant_key(&self, image: &Image, variant: &ProcessedVariant) -> String {
        derive_key(
            image.owner_id,
            image.id,
            variant.variant.as_str(),
            variant.format,
        )
    }

    /// Failure path: remove whatever objects were written, park the
    /// aggregate as deleted. Cleanup is best-effort by design.
    async fn abandon_upload(&self, image: &Image) {
        warn!(image_id = %image.id, "upload failed, cleaning up");

        for variant in crate::imaging::processor::Variant::ALL {
            // The exact extension per variant is unknown on this path; try
            // the formats the processor can produce.
            for format in ["webp", "jpg", "jpeg", "png", "gif"] {
                let key = derive_key(image.owner_id, image.id, variant.as_str(), format);
                match self.storage.delete(&key).await {
                    Ok(()) => break,
                    Err(StorageError::NotFound) => continue,
                    Err(e) => {
                        warn!(key, "cleanup delete failed: {}", e);
                        break;
                    },
                }
            }
        }

        if let Err(e) = self
            .repository
            .set_status(image.id, ImageStatus::Deleted)
            .await
        {
            warn!(image_id = %image.id, "failed to park aggregate as deleted: {}", e);
        }
    }

    /// Soft-delete an image and remove its stored variants best-effort.
    pub async fn delete_image(&self, image: &Image) -> Result<(), UploadError> {
        self.repository
            .set_status(image.id, ImageStatus::Deleted)
            .await?;

        let variants = self.repository.variants(image.id).await.unwrap_or_default();
        for row in variants {
            match self.storage.delete(&row.storage_key).await {
                Ok(()) | Err(StorageError::NotFound) => {},
                Err(e) => warn!(key = %row.storage_key, "variant object delete failed: {}", e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::Mutex;

    use image::{DynamicImage, ImageFormat, RgbImage};

    use crate::imaging::processor::ProcessorConfig;
    use crate::imaging::validator::ValidatorConfig;
    use crate::storage::local::LocalStorageProvider;
    use crate::storage::StorageProvider;

    /// In-memory aggregate store mirroring the repository contract.
    #[derive(Default)]
    struct MemoryRepository {
        images: Mutex<HashMap<Uuid, Image>>,
        variants: Mutex<Vec<ImageVariantRow>>,
        tags: Mutex<HashMap<Uuid, Vec<String>>>,
        fail_attach: bool,
    }

    #[async_trait]
    impl ImageRepository for MemoryRepository {
        async fn create_image(&self, image: NewImage) -> Result<Image, ImageError> {
            let now = chrono::Utc::now();
            let row = Image {
                id: image.id,
                owner_id: image.owner_id,
                status: image.status,
                visibility: image.visibility,
                title: image.title,
                description: image.description,
                mime_type: image.mime_type,
                file_size: image.file_size,
                width: image.width,
                height: image.height,
                original_filename: image.original_filename,
                storage_key: image.storage_key,
                storage_provider: image.storage_provider,
                created_at: now,
                updated_at: now,
            };
            self.images.lock().unwrap().insert(row.id, row.clone());
            Ok(row)
        }

        async fn attach_variant(
            &self,
            variant: NewImageVariant,
        ) -> Result<ImageVariantRow, ImageError> {
            if self.fail_attach {
                return Err(ImageError::NotFound);
            }
            let row = ImageVariantRow {
                id: Uuid::new_v4(),
                image_id: variant.image_id,
                variant: variant.variant,
                storage_key: variant.storage_key,
                width: variant.width,
                height: variant.height,
                file_size: variant.file_size,
                format: variant.format,
                created_at: chrono::Utc::now(),
            };
            self.variants.lock().unwrap().push(row.clone());
            Ok(row)
        }

        async fn set_status(&self, image_id: Uuid, status: ImageStatus) -> Result<(), ImageError> {
            let mut images = self.images.lock().unwrap();
            let image = images.get_mut(&image_id).ok_or(ImageError::NotFound)?;
            image.status = status.as_str().to_string();
            Ok(())
        }

        async fn set_tags(&self, image_id: Uuid, slugs: &[String]) -> Result<(), ImageError> {
            self.tags
                .lock()
                .unwrap()
                .insert(image_id, slugs.to_vec());
            Ok(())
        }

        async fn variants(&self, image_id: Uuid) -> Result<Vec<ImageVariantRow>, ImageError> {
            Ok(self
                .variants
                .lock()
                .unwrap()
                .iter()
                .filter(|v| v.image_id == image_id)
                .cloned()
                .collect())
        }
    }

    fn jpeg_bytes(width: u32, height: u32) -> Bytes {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            image::Rgb([90, 120, 180]),
        ));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Jpeg).unwrap();
        Bytes::from(buf.into_inner())
    }

    async fn service_with(
        repository: Arc<MemoryRepository>,
    ) -> (tempfile::TempDir, UploadService, Arc<dyn StorageProvider>) {
        let dir = tempfile::tempdir().unwrap();
        let provider: Arc<dyn StorageProvider> =
            Arc::new(LocalStorageProvider::new(dir.path()).await.unwrap());
        let storage = Arc::new(StorageOrchestrator::new(provider.clone(), None, false));

        let service = UploadService::new(
            Arc::new(ImageValidator::new(ValidatorConfig::default(), None)),
            Arc::new(ImageProcessor::new(ProcessorConfig::default())),
            storage,
            repository,
        );
        (dir, service, provider)
    }

    #[tokio::test]
    async fn test_successful_upload_activates_aggregate() {
        let repo = Arc::new(MemoryRepository::default());
        let (_dir, service, provider) = service_with(repo.clone()).await;
        let owner = Uuid::new_v4();

        let result = service
            .upload(
                owner,
                jpeg_bytes(800, 600),
                "holiday photo.jpg",
                UploadRequest {
                    title: Some("Holiday".to_string()),
                    tags: vec!["Beach Trip".to_string(), "2026!".to_string()],
                    ..UploadRequest::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(result.image.status, "active");
        assert_eq!(result.variants.len(), 5);
        assert_eq!(result.tags, vec!["beach-trip", "2026"]);
        assert_eq!(result.image.original_filename, "holiday_photo.jpg");

        // Every declared variant object exists in the primary store.
        for row in &result.variants {
            assert!(provider.exists(&row.storage_key).await.unwrap());
        }

        let stored = repo.images.lock().unwrap();
        assert_eq!(stored[&result.image.id].status, "active");
    }

    #[tokio::test]
    async fn test_invalid_upload_never_creates_aggregate() {
        let repo = Arc::new(MemoryRepository::default());
        let (_dir, service, _provider) = service_with(repo.clone()).await;

        let result = service
            .upload(
                Uuid::new_v4(),
                Bytes::from_static(b"#!/bin/sh\nnot an image at all here"),
                "evil.jpg",
                UploadRequest::default(),
            )
            .await;

        assert!(matches!(
            result,
            Err(UploadError::Validation(ValidationError::InvalidMimeType))
        ));
        assert!(repo.images.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mid_pipeline_failure_cleans_up() {
        let repo = Arc::new(MemoryRepository {
            fail_attach: true,
            ..MemoryRepository::default()
        });
        let (_dir, service, provider) = service_with(repo.clone()).await;
        let owner = Uuid::new_v4();

        let result = service
            .upload(owner, jpeg_bytes(400, 300), "x.jpg", UploadRequest::default())
            .await;
        assert!(result.is_err());

        // The aggregate is parked as deleted, never active.
        let images = repo.images.lock().unwrap();
        let (_, image) = images.iter().next().unwrap();
        assert_eq!(image.status, "deleted");

        // No orphaned variant objects remain.
        for variant in crate::imaging::processor::Variant::ALL {
            for format in ["webp", "jpg", "jpeg", "png", "gif"] {
                let key = derive_key(owner, image.id, variant.as_str(), format);
                assert!(!provider.exists(&key).await.unwrap(), "orphan at {}", key);
            }
        }
    }

    #[tokio::test]
    async fn test_pixel_bomb_rejected_before_processing() {
        let repo = Arc::new(MemoryRepository::default());
        let dir = tempfile::tempdir().unwrap();
        let provider: Arc<dyn StorageProvider> =
            Arc::new(LocalStorageProvider::new(dir.path()).await.unwrap());
        let storage = Arc::new(StorageOrchestrator::new(provider, None, false));

        let service = UploadService::new(
            Arc::new(ImageValidator::new(
                ValidatorConfig {
                    max_pixels: 50_000,
                    ..ValidatorConfig::default()
                },
                None,
            )),
            Arc::new(ImageProcessor::new(ProcessorConfig::default())),
            storage,
            repo.clone(),
        );

        let result = service
            .upload(
                Uuid::new_v4(),
                jpeg_bytes(300, 300),
                "bomb.jpg",
                UploadRequest::default(),
            )
            .await;

        assert!(matches!(
            result,
            Err(UploadError::Validation(
                ValidationError::ImageTooManyPixels(90_000, 50_000)
            ))
        ));
        assert!(repo.images.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_image_removes_objects() {
        let repo = Arc::new(MemoryRepository::default());
        let (_dir, service, provider) = service_with(repo.clone()).await;

        let uploaded = service
            .upload(
                Uuid::new_v4(),
                jpeg_bytes(500, 500),
                "gone.jpg",
                UploadRequest::default(),
            )
            .await
            .unwrap();

        service.delete_image(&uploaded.image).await.unwrap();

        for row in &uploaded.variants {
            assert!(!provider.exists(&row.storage_key).await.unwrap());
        }
        assert_eq!(
            repo.images.lock().unwrap()[&uploaded.image.id].status,
            "deleted"
        );
    }
}
