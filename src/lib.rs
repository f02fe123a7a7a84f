// Library exports for the Lumina gallery backend

pub mod app;
pub mod app_config;
pub mod config;
pub mod db;
pub mod handlers;
pub mod imaging;
pub mod middleware;
pub mod migrations;
pub mod models;
pub mod schema;
pub mod services;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use app::AppState;
pub use app_config::{AppConfig, CONFIG};
pub use config::RateLimitingConfig;
pub use db::{DieselPool, RedisConfig, RedisPool};
pub use middleware::{auth_middleware, AuthenticatedUser};
pub use models::auth::AccessTokenClaims;
pub use services::{
    AccessTokenConfig, AccessTokenService, AuthError, AuthService, ClientInfo, RateLimitService,
    RefreshTokenService, SessionService, TokenBlacklist, UploadService,
};
pub use storage::{StorageError, StorageOrchestrator, StorageProvider};
pub use utils::problem::ApiError;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::info;

use crate::imaging::processor::{ImageProcessor, ProcessorConfig};
use crate::imaging::scanner::{ClamavScanner, MalwareScanner};
use crate::imaging::validator::{ImageValidator, ValidatorConfig};
use crate::storage::ipfs::{IpfsConfig, IpfsStorageProvider};
use crate::storage::local::LocalStorageProvider;
use crate::storage::s3::{S3Config, S3StorageProvider};
use crate::storage::ProviderKind;

/// Build the storage orchestrator from configuration: one primary provider
/// plus the optional content-addressed mirror.
pub async fn build_storage(
    config: &AppConfig,
    redis_pool: RedisPool,
) -> anyhow::Result<Arc<StorageOrchestrator>> {
    let kind = ProviderKind::from_str_tag(&config.storage.provider)
        .with_context(|| format!("unknown storage provider: {}", config.storage.provider))?;

    let primary: Arc<dyn StorageProvider> = match kind {
        ProviderKind::Local => {
            info!("storage: local filesystem at {}", config.storage.local_path);
            Arc::new(LocalStorageProvider::new(config.storage.local_path.clone()).await?)
        },
        ProviderKind::Ipfs => {
            bail!("IPFS can only be configured as the mirror provider");
        },
        other => {
            info!(
                "storage: {} bucket {} ({})",
                other.as_str(),
                config.storage.s3.bucket,
                config.storage.s3.endpoint.as_deref().unwrap_or("default endpoint"),
            );
            Arc::new(
                S3StorageProvider::new(S3Config {
                    kind: other,
                    bucket: config.storage.s3.bucket.clone(),
                    region: config.storage.s3.region.clone(),
                    endpoint: config.storage.s3.endpoint.clone(),
                    access_key: config.storage.s3.access_key.clone(),
                    secret_key: config.storage.s3.secret_key.clone(),
                    force_path_style: config.storage.s3.force_path_style,
                    public_base_url: config.storage.s3.public_base_url.clone(),
                })
                .await,
            )
        },
    };

    let mirror: Option<Arc<dyn StorageProvider>> = if config.storage.ipfs.enabled {
        info!(
            "storage mirror: IPFS node at {}",
            config.storage.ipfs.api_endpoint
        );
        Some(Arc::new(IpfsStorageProvider::new(
            IpfsConfig {
                api_endpoint: config.storage.ipfs.api_endpoint.clone(),
                pin_by_default: config.storage.ipfs.pin_by_default,
                timeout: Duration::from_secs(30),
            },
            redis_pool,
        )?))
    } else {
        None
    };

    Ok(Arc::new(StorageOrchestrator::new(
        primary,
        mirror,
        config.storage.ipfs.async_upload,
    )))
}

/// Initialize the full application state. Used by main and by integration
/// harnesses that embed the backend.
pub async fn initialize_app_state() -> anyhow::Result<AppState> {
    dotenv::dotenv().ok();
    let config = app_config::config();

    info!("Initializing database pool...");
    let db_config = db::DieselDatabaseConfig::default();
    let diesel_pool = db::create_diesel_pool(db_config).await?;

    if migrations::should_run_migrations() {
        info!("Running embedded migrations...");
        migrations::run_migrations()
            .await
            .map_err(|e| anyhow::anyhow!("migration failed: {}", e))?;
    }

    info!("Initializing Redis pool...");
    let redis_config = RedisConfig::from_env();
    let redis_pool = RedisPool::new(redis_config).await?;

    let storage = build_storage(config, redis_pool.clone()).await?;

    let scanner: Option<Arc<dyn MalwareScanner>> = if config.scanner.enabled {
        info!("malware scanning via clamd at {}", config.scanner.endpoint);
        Some(Arc::new(ClamavScanner::new(
            config.scanner.endpoint.clone(),
            Duration::from_secs(config.scanner.timeout_seconds),
        )))
    } else {
        info!("malware scanning disabled; uploads will be recorded as unscanned");
        None
    };

    let validator = Arc::new(ImageValidator::new(
        ValidatorConfig {
            max_file_size: config.upload.max_upload_size_bytes,
            max_width: config.upload.max_image_width,
            max_height: config.upload.max_image_height,
            max_pixels: config.upload.max_pixel_count,
        },
        scanner,
    ));

    let processor = Arc::new(ImageProcessor::new(ProcessorConfig {
        max_concurrent: config.processor.max_concurrent,
        memory_limit_mb: config.processor.memory_mb,
    }));

    let access_tokens = Arc::new(AccessTokenService::new(AccessTokenConfig::from_settings(
        &config.jwt,
    )?));
    let refresh_tokens = Arc::new(RefreshTokenService::new(
        diesel_pool.clone(),
        config.jwt.refresh_ttl,
    ));
    let sessions = Arc::new(SessionService::new(
        diesel_pool.clone(),
        redis_pool.clone(),
    ));
    let blacklist = Arc::new(TokenBlacklist::new(redis_pool.clone()));

    let auth_service = Arc::new(AuthService::new(
        diesel_pool.clone(),
        redis_pool.clone(),
        access_tokens,
        refresh_tokens,
        sessions,
        blacklist,
    ));

    let repository = Arc::new(services::DieselImageRepository::new(diesel_pool.clone()));
    let upload_service = Arc::new(UploadService::new(
        validator,
        processor,
        storage.clone(),
        repository,
    ));

    let rate_limit_config = Arc::new(RateLimitingConfig::from_env());
    rate_limit_config
        .validate()
        .map_err(|e| anyhow::anyhow!("rate limit configuration invalid: {}", e))?;
    let rate_limit_service = Arc::new(RateLimitService::new(redis_pool.clone()));

    Ok(AppState {
        config: Arc::new(config.clone()),
        diesel_pool,
        redis_pool,
        auth_service,
        upload_service,
        storage,
        rate_limit_service,
        rate_limit_config,
    })
}
