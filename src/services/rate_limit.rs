// Rate limiting service
// Fixed-window counters in Redis, one key per subject per window, with an
// optional burst allowance and a block key that outlives the window when a
// client keeps hammering. The whole check is a single Lua script so
// concurrent requests cannot double-count.

use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::db::RedisPool;

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Redis connection error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Invalid rate limit key")]
    InvalidKey,
}

/// One request class's limit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Maximum requests allowed in the window.
    pub max_requests: u32,

    /// Window length in seconds.
    pub window_seconds: u32,

    /// Extra headroom above `max_requests` for short bursts.
    pub burst_limit: Option<u32>,

    /// How long to block a subject that exceeds the limit.
    pub block_duration: u32,
}

/// Outcome of a rate limit check, with everything the HTTP layer needs to
/// fill the X-RateLimit-* headers.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix timestamp when the current window resets.
    pub reset_time: u64,
    pub retry_after: Option<u32>,
}

const CHECK_SCRIPT: &str = r#"
    local key = KEYS[1]
    local block_key = KEYS[2]
    local limit = tonumber(ARGV[1])
    local window = tonumber(ARGV[2])
    local block_duration = tonumber(ARGV[3])

    local block_ttl = redis.call('TTL', block_key)
    if block_ttl > 0 then
        return {0, 0, block_ttl, block_ttl}
    end

    local count = redis.call('INCR', key)
    if count == 1 then
        redis.call('EXPIRE', key, window)
    end

    local window_ttl = redis.call('TTL', key)
    if window_ttl < 0 then
        window_ttl = window
    end

    if count > limit then
        redis.call('SET', block_key, '1', 'EX', block_duration)
        return {0, 0, window_ttl, block_duration}
    end

    return {1, limit - count, window_ttl, 0}
"#;

pub struct RateLimitService {
    redis_pool: RedisPool,
}

impl RateLimitService {
    pub fn new(redis_pool: RedisPool) -> Self {
        Self { redis_pool }
    }

    /// Check and consume one request for `key` under `config`.
    pub async fn check(
        &self,
        key: &str,
        config: &RateLimitConfig,
    ) -> Result<RateLimitResult, RateLimitError> {
        if key.is_empty() {
            return Err(RateLimitError::InvalidKey);
        }

        let mut conn = self.redis_pool.get_connection().await?;

        // Burst headroom is granted on top of the base limit; the published
        // limit stays the configured number.
        let effective_limit = config
            .burst_limit
            .map(|burst| config.max_requests + burst)
            .unwrap_or(config.max_requests);

        let window_key = format!("rate:{}", key);
        let block_key = format!("rate:{}:blocked", key);

        let result: Vec<i64> = redis::Script::new(CHECK_SCRIPT)
            .key(&window_key)
            .key(&block_key)
            .arg(effective_limit)
            .arg(config.window_seconds)
            .arg(config.block_duration)
            .invoke_async(&mut conn)
            .await?;

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let allowed = result[0] == 1;
        let remaining = (result[1].max(0) as u32).min(config.max_requests);
        let reset_time = now + result[2].max(0) as u64;
        let retry_after = (result[3] > 0).then(|| result[3] as u32);

        Ok(RateLimitResult {
            allowed,
            limit: config.max_requests,
            remaining,
            reset_time,
            retry_after,
        })
    }

    /// Drop all counters for a subject, e.g. after a password reset or for
    /// operator intervention.
    pub async fn reset(&self, key: &str) -> Result<(), RateLimitError> {
        let mut conn = self.redis_pool.get_connection().await?;
        let deleted: i64 = conn
            .del(&[format!("rate:{}", key), format!("rate:{}:blocked", key)])
            .await?;
        if deleted > 0 {
            warn!(key, "rate limit counters reset");
        }
        Ok(())
    }
}
