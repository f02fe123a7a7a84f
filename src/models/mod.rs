// Database models

pub mod auth;
pub mod image;
pub mod refresh_token;
pub mod session;
pub mod user;

pub use auth::AccessTokenClaims;
pub use image::{
    Image, ImageError, ImageStatus, ImageVariantRow, ImageVisibility, NewImage, NewImageVariant,
};
pub use refresh_token::{NewRefreshToken, RefreshToken, RefreshTokenError};
pub use session::{NewSession, Session, SessionError};
pub use user::{NewUser, User, UserError, UserRole, UserStatus};
