// Authenticated user context

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::auth::AccessTokenClaims;
use crate::models::user::UserRole;

/// Authenticated user information extracted from a validated access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub token_id: String,
    pub email: String,
    pub role: UserRole,
    pub exp: u64,
}

impl AuthenticatedUser {
    /// Build from validated claims. Fails only if the id claims are not
    /// well-formed UUIDs, which a token we signed never produces.
    pub fn from_claims(claims: &AccessTokenClaims) -> Option<Self> {
        Some(Self {
            user_id: Uuid::parse_str(&claims.sub).ok()?,
            session_id: Uuid::parse_str(&claims.sid).ok()?,
            token_id: claims.jti.clone(),
            email: claims.email.clone(),
            role: claims.role.parse().unwrap_or(UserRole::User),
            exp: claims.exp,
        })
    }

    pub fn is_moderator(&self) -> bool {
        matches!(self.role, UserRole::Moderator | UserRole::Admin)
    }
}
