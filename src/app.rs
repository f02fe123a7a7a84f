// Application state shared across handlers
use std::sync::Arc;

use crate::{
    app_config::AppConfig,
    config::RateLimitingConfig,
    db::{DieselPool, RedisPool},
    services::{AuthService, RateLimitService, UploadService},
    storage::StorageOrchestrator,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub diesel_pool: DieselPool,
    pub redis_pool: RedisPool,
    pub auth_service: Arc<AuthService>,
    pub upload_service: Arc<UploadService>,
    pub storage: Arc<StorageOrchestrator>,
    pub rate_limit_service: Arc<RateLimitService>,
    pub rate_limit_config: Arc<RateLimitingConfig>,
}
