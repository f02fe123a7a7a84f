// Refresh token service
// Tokens are opaque 256-bit random strings; only their SHA-256 digest and
// rotation metadata are persisted. Rotation is linearizable per token: the
// parent's used flag is flipped by compare-and-set inside the same
// transaction that inserts the child, so two racing refreshes cannot both
// succeed.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::AsyncConnection;
use rand::RngCore;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::db::DieselPool;
use crate::models::refresh_token::{NewRefreshToken, RefreshToken, RefreshTokenError};

/// Bytes of OS entropy per token.
const TOKEN_ENTROPY_BYTES: usize = 32;

#[derive(Error, Debug)]
pub enum RefreshServiceError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error(transparent)]
    Token(#[from] RefreshTokenError),
}

/// Client fingerprint captured with each token.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

pub struct RefreshTokenService {
    db_pool: DieselPool,
    /// Token lifetime in seconds.
    ttl: u64,
}

impl RefreshTokenService {
    pub fn new(db_pool: DieselPool, ttl: u64) -> Self {
        Self { db_pool, ttl }
    }

    pub fn ttl(&self) -> u64 {
        self.ttl
    }

    fn random_token() -> String {
        let mut bytes = [0u8; TOKEN_ENTROPY_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
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
        RefreshServiceError,
    > {
        self.db_pool
            .get()
            .await
            .map_err(|e| RefreshServiceError::Pool(e.to_string()))
    }

    /// Issue a fresh token. With no family given a new family is minted
    /// (login); passing the parent's family and hash chains a rotation.
    pub async fn generate(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        family_id: Option<Uuid>,
        parent_hash: Option<String>,
        client: ClientInfo,
    ) -> Result<(String, RefreshToken), RefreshServiceError> {
        let token = Self::random_token();
        let now = Utc::now();

        let new_token = NewRefreshToken {
            user_id,
            session_id,
            token_hash: RefreshToken::hash_token(&token),
            family_id: family_id.unwrap_or_else(Uuid::new_v4),
            parent_hash,
            issued_at: now,
            expires_at: now + Duration::seconds(self.ttl as i64),
            ip_address: client.ip_address,
            user_agent: client.user_agent,
        };

        let mut conn = self.conn().await?;
        let stored = RefreshToken::store(&mut conn, new_token).await?;
        Ok((token, stored))
    }

    /// Validate a presented token and return its metadata.
    pub async fn validate(&self, token: &str) -> Result<RefreshToken, RefreshServiceError> {
        let mut conn = self.conn().await?;
        let metadata = RefreshToken::validate(&mut conn, &RefreshToken::hash_token(token)).await?;
        Ok(metadata)
    }

    /// Mark a token used. Idempotent: marking an already-used token is a
    /// no-op here; the rotation path detects reuse through its own CAS.
    pub async fn mark_used(&self, token: &str) -> Result<(), RefreshServiceError> {
        let mut conn = self.conn().await?;
        RefreshToken::mark_used_cas(&mut conn, &RefreshToken::hash_token(token)).await?;
        Ok(())
    }

    /// Rotate a validated token: atomically consume the parent and issue
    /// its child in the same family. Returns `ReplayDetected` when the
    /// parent was consumed by a concurrent request first.
    pub async fn rotate(
        &self,
        parent: &RefreshToken,
        parent_token: &str,
        client: ClientInfo,
    ) -> Result<(String, RefreshToken), RefreshServiceError> {
        let token = Self::random_token();
        let token_hash = RefreshToken::hash_token(&token);
        let parent_hash = RefreshToken::hash_token(parent_token);
        let now = Utc::now();

        let new_token = NewRefreshToken {
            user_id: parent.user_id,
            session_id: parent.session_id,
            token_hash,
            family_id: parent.family_id,
            parent_hash: Some(parent_hash.clone()),
            issued_at: now,
            expires_at: now + Duration::seconds(self.ttl as i64),
            ip_address: client.ip_address,
            user_agent: client.user_agent,
        };

        let mut conn = self.conn().await?;
        let stored = conn
            .transaction::<RefreshToken, RefreshTokenError, _>(|tx| {
                async move {
                    // The parent must still be unused; losing this CAS means
                    // another presentation of the same token won the race.
                    let consumed = RefreshToken::mark_used_cas(tx, &parent_hash).await?;
                    if !consumed {
                        return Err(RefreshTokenError::ReplayDetected);
                    }

                    RefreshToken::store(tx, new_token).await
                }
                .scope_boxed()
            })
            .await?;

        Ok((token, stored))
    }

    pub async fn revoke_token(&self, token: &str, reason: &str) -> Result<(), RefreshServiceError> {
        let mut conn = self.conn().await?;
        RefreshToken::revoke(&mut conn, &RefreshToken::hash_token(token), reason).await?;
        Ok(())
    }

    /// Revoke a whole family. The only correct response to replay.
    pub async fn revoke_family(
        &self,
        family_id: Uuid,
        reason: &str,
    ) -> Result<usize, RefreshServiceError> {
        let mut conn = self.conn().await?;
        let revoked = RefreshToken::revoke_family(&mut conn, family_id, reason).await?;
        if revoked > 0 {
            warn!(%family_id, revoked, reason, "revoked refresh token family");
        }
        Ok(revoked)
    }

    pub async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        reason: &str,
    ) -> Result<usize, RefreshServiceError> {
        let mut conn = self.conn().await?;
        let revoked = RefreshToken::revoke_all_for_user(&mut conn, user_id, reason).await?;
        Ok(revoked)
    }

    /// Advisory replay heuristic: flag when the client fingerprint changed
    /// between parent and child. Never revokes by itself.
    pub fn detect_anomalies(
        metadata: &RefreshToken,
        current_ip: Option<&str>,
        current_user_agent: Option<&str>,
    ) -> bool {
        let ip_changed = match (metadata.ip_address.as_deref(), current_ip) {
            (Some(stored), Some(current)) => stored != current,
            _ => false,
        };
        let agent_changed = match (metadata.user_agent.as_deref(), current_user_agent) {
            (Some(stored), Some(current)) => stored != current,
            _ => false,
        };
        ip_changed || agent_changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_random_tokens_are_unique_and_long() {
        let a = RefreshTokenService::random_token();
        let b = RefreshTokenService::random_token();

        assert_ne!(a, b);
        // 32 bytes base64url -> 43 chars unpadded.
        assert_eq!(a.len(), 43);
    }

    fn metadata(ip: Option<&str>, agent: Option<&str>) -> RefreshToken {
        let now = Utc::now();
        RefreshToken {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            token_hash: RefreshToken::hash_token("t"),
            family_id: Uuid::new_v4(),
            parent_hash: None,
            issued_at: now,
            expires_at: now + Duration::days(7),
            used: false,
            revoked_at: None,
            revoked_reason: None,
            ip_address: ip.map(str::to_string),
            user_agent: agent.map(str::to_string),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_detect_anomalies() {
        let stored = metadata(Some("203.0.113.1"), Some("Firefox"));

        assert!(!RefreshTokenService::detect_anomalies(
            &stored,
            Some("203.0.113.1"),
            Some("Firefox")
        ));
        assert!(RefreshTokenService::detect_anomalies(
            &stored,
            Some("198.51.100.7"),
            Some("Firefox")
        ));
        assert!(RefreshTokenService::detect_anomalies(
            &stored,
            Some("203.0.113.1"),
            Some("curl/8.0")
        ));

        // Missing data on either side is not an anomaly.
        assert!(!RefreshTokenService::detect_anomalies(
            &metadata(None, None),
            Some("203.0.113.1"),
            Some("Firefox")
        ));
        assert!(!RefreshTokenService::detect_anomalies(&stored, None, None));
    }
}
