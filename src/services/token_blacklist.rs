// Access-token blacklist
// Revoked JTIs live in Redis with a TTL equal to the token's remaining
// lifetime. When the TTL lapses the entry disappears, which is fine: by
// then the token fails expiry validation on its own.

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use thiserror::Error;
use tracing::debug;

use crate::db::RedisPool;

const BLACKLIST_KEY_PREFIX: &str = "auth:blacklist:";

#[derive(Error, Debug)]
pub enum BlacklistError {
    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),
}

pub struct TokenBlacklist {
    redis_pool: RedisPool,
}

impl TokenBlacklist {
    pub fn new(redis_pool: RedisPool) -> Self {
        Self { redis_pool }
    }

    fn key(jti: &str) -> String {
        format!("{}{}", BLACKLIST_KEY_PREFIX, jti)
    }

    /// Blacklist a JTI until the token's natural expiry. Tokens that are
    /// already expired need no entry.
    pub async fn add(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<(), BlacklistError> {
        let remaining = (expires_at - Utc::now()).num_seconds();
        if remaining <= 0 {
            debug!(jti, "skipping blacklist for already-expired token");
            return Ok(());
        }

        let mut conn = self.redis_pool.get_connection().await?;
        conn.set_ex::<_, _, ()>(Self::key(jti), 1u8, remaining as u64)
            .await?;
        Ok(())
    }

    /// The blacklist is authoritative: a positive answer revokes the token
    /// regardless of signature validity.
    pub async fn is_blacklisted(&self, jti: &str) -> Result<bool, BlacklistError> {
        let mut conn = self.redis_pool.get_connection().await?;
        let exists: bool = conn.exists(Self::key(jti)).await?;
        Ok(exists)
    }

    pub async fn remove(&self, jti: &str) -> Result<(), BlacklistError> {
        let mut conn = self.redis_pool.get_connection().await?;
        conn.del::<_, ()>(Self::key(jti)).await?;
        Ok(())
    }
}
