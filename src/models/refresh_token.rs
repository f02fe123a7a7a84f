// Refresh token metadata model
// The token itself is never stored; rows are indexed by a SHA-256 digest of
// the presented token. Rotation chains are tracked per family so a detected
// replay can revoke every descendant at once.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::schema::refresh_tokens;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = refresh_tokens)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub token_hash: String,
    pub family_id: Uuid,
    pub parent_hash: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshToken {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub token_hash: String,
    pub family_id: Uuid,
    pub parent_hash: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum RefreshTokenError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Token not found")]
    NotFound,

    #[error("Token expired")]
    Expired,

    #[error("Token replay detected")]
    ReplayDetected,

    #[error("Token revoked")]
    Revoked,
}

impl RefreshToken {
    /// SHA-256 digest of a presented token string, hex encoded. Tokens carry
    /// 256 bits of OS entropy, so an unsalted digest is not invertible.
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub async fn store(
        conn: &mut AsyncPgConnection,
        new_token: NewRefreshToken,
    ) -> Result<Self, RefreshTokenError> {
        diesel::insert_into(refresh_tokens::table)
            .values(&new_token)
            .get_result::<RefreshToken>(conn)
            .await
            .map_err(RefreshTokenError::Database)
    }

    pub async fn find_by_hash(
        conn: &mut AsyncPgConnection,
        token_hash_val: &str,
    ) -> Result<Self, RefreshTokenError> {
        use crate::schema::refresh_tokens::dsl::*;

        refresh_tokens
            .filter(token_hash.eq(token_hash_val))
            .first::<RefreshToken>(conn)
            .await
            .map_err(|e| match e {
                diesel::result::Error::NotFound => RefreshTokenError::NotFound,
                other => RefreshTokenError::Database(other),
            })
    }

    /// Validate a presented token by digest. Check order matters: a used
    /// token reports replay even when its family has since been revoked,
    /// which is what lets the caller distinguish the attack presentation
    /// from collateral revocations.
    pub async fn validate(
        conn: &mut AsyncPgConnection,
        token_hash_val: &str,
    ) -> Result<Self, RefreshTokenError> {
        let token = Self::find_by_hash(conn, token_hash_val).await?;

        if token.expires_at <= Utc::now() {
            return Err(RefreshTokenError::Expired);
        }
        if token.used {
            return Err(RefreshTokenError::ReplayDetected);
        }
        if token.revoked_at.is_some() {
            return Err(RefreshTokenError::Revoked);
        }
        Ok(token)
    }

    /// Compare-and-set the used flag. Returns the row only if this call was
    /// the one that flipped it; a concurrent winner leaves nothing to update
    /// and the caller must treat that as replay.
    pub async fn mark_used_cas(
        conn: &mut AsyncPgConnection,
        token_hash_val: &str,
    ) -> Result<bool, RefreshTokenError> {
        use crate::schema::refresh_tokens::dsl::*;

        let updated = diesel::update(
            refresh_tokens
                .filter(token_hash.eq(token_hash_val))
                .filter(used.eq(false)),
        )
        .set((used.eq(true), updated_at.eq(Utc::now())))
        .execute(conn)
        .await?;

        Ok(updated > 0)
    }

    /// Revoke a single token.
    pub async fn revoke(
        conn: &mut AsyncPgConnection,
        token_hash_val: &str,
        reason: &str,
    ) -> Result<bool, RefreshTokenError> {
        use crate::schema::refresh_tokens::dsl::*;

        let now = Utc::now();
        let updated = diesel::update(
            refresh_tokens
                .filter(token_hash.eq(token_hash_val))
                .filter(revoked_at.is_null()),
        )
        .set((
            revoked_at.eq(Some(now)),
            revoked_reason.eq(Some(reason)),
            updated_at.eq(now),
        ))
        .execute(conn)
        .await?;

        Ok(updated > 0)
    }

    /// Revoke every token in a family. One-way; the only correct response
    /// to a detected replay.
    pub async fn revoke_family(
        conn: &mut AsyncPgConnection,
        family_id_val: Uuid,
        reason: &str,
    ) -> Result<usize, RefreshTokenError> {
        use crate::schema::refresh_tokens::dsl::*;

        let now = Utc::now();
        let updated = diesel::update(
            refresh_tokens
                .filter(family_id.eq(family_id_val))
                .filter(revoked_at.is_null()),
        )
        .set((
            revoked_at.eq(Some(now)),
            revoked_reason.eq(Some(reason)),
            updated_at.eq(now),
        ))
        .execute(conn)
        .await?;

        Ok(updated)
    }

    /// Revoke every live token belonging to a user, across all families.
    pub async fn revoke_all_for_user(
        conn: &mut AsyncPgConnection,
        user_id_val: Uuid,
        reason: &str,
    ) -> Result<usize, RefreshTokenError> {
        use crate::schema::refresh_tokens::dsl::*;

        let now = Utc::now();
        let updated = diesel::update(
            refresh_tokens
                .filter(user_id.eq(user_id_val))
                .filter(revoked_at.is_null()),
        )
        .set((
            revoked_at.eq(Some(now)),
            revoked_reason.eq(Some(reason)),
            updated_at.eq(now),
        ))
        .execute(conn)
        .await?;

        Ok(updated)
    }

    /// Delete expired and long-revoked rows. Run periodically.
    pub async fn cleanup_expired(
        conn: &mut AsyncPgConnection,
    ) -> Result<usize, RefreshTokenError> {
        use crate::schema::refresh_tokens::dsl::*;

        let deleted = diesel::delete(refresh_tokens.filter(expires_at.le(Utc::now())))
            .execute(conn)
            .await?;

        Ok(deleted)
    }

    pub fn is_active(&self) -> bool {
        !self.used && self.revoked_at.is_none() && self.expires_at > Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_token_hashing_is_stable_hex() {
        let a = RefreshToken::hash_token("token-a");
        let b = RefreshToken::hash_token("token-b");

        assert_ne!(a, b);
        assert_eq!(a, RefreshToken::hash_token("token-a"));
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    fn token(used: bool, revoked: bool, expires_in: Duration) -> RefreshToken {
        let now = Utc::now();
        RefreshToken {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            token_hash: RefreshToken::hash_token("x"),
            family_id: Uuid::new_v4(),
            parent_hash: None,
            issued_at: now,
            expires_at: now + expires_in,
            used,
            revoked_at: revoked.then(|| now),
            revoked_reason: revoked.then(|| "test".to_string()),
            ip_address: None,
            user_agent: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_active_requires_unused_unrevoked_unexpired() {
        assert!(token(false, false, Duration::hours(1)).is_active());
        assert!(!token(true, false, Duration::hours(1)).is_active());
        assert!(!token(false, true, Duration::hours(1)).is_active());
        assert!(!token(false, false, Duration::hours(-1)).is_active());
    }
}
