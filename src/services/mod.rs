// Service layer

pub mod access_token;
pub mod auth;
pub mod maintenance;
pub mod rate_limit;
pub mod refresh_token;
pub mod session;
pub mod token_blacklist;
pub mod upload;

pub use access_token::{AccessTokenConfig, AccessTokenError, AccessTokenService};
pub use auth::{AuthError, AuthService, RegisterInput, TokenPair};
pub use rate_limit::{RateLimitConfig, RateLimitError, RateLimitResult, RateLimitService};
pub use refresh_token::{ClientInfo, RefreshServiceError, RefreshTokenService};
pub use session::{SessionService, SessionStoreError};
pub use token_blacklist::{BlacklistError, TokenBlacklist};
pub use upload::{
    DieselImageRepository, ImageRepository, UploadError, UploadRequest, UploadService,
    UploadedImage,
};
