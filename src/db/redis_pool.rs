// Redis connection pool
// A fixed set of multiplexed ConnectionManager handles, dealt out
// round-robin. Creation retries with capped exponential backoff.

use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, warn};

use super::redis_config::RedisConfig;

/// Cap for exponential backoff between connection attempts.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct RedisPool {
    connections: Arc<Vec<ConnectionManager>>,
    next: Arc<AtomicUsize>,
    config: RedisConfig,
}

/// Health check result for Redis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisHealth {
    pub is_healthy: bool,
    pub latency_ms: u64,
    pub pool_size: u32,
    pub error: Option<String>,
}

impl RedisPool {
    pub async fn new(config: RedisConfig) -> Result<Self, RedisError> {
        config.validate().map_err(|e| {
            RedisError::from((
                redis::ErrorKind::InvalidClientConfig,
                "Invalid Redis configuration",
                e,
            ))
        })?;

        info!(
            url = %mask_redis_url(&config.redis_url),
            pool_size = config.pool_size,
            "initializing Redis pool"
        );

        let client = Client::open(config.redis_url.as_str())?;

        let mut connections = Vec::with_capacity(config.pool_size as usize);
        for i in 0..config.pool_size {
            match create_connection_with_retry(&client, &config).await {
                Ok(conn) => connections.push(conn),
                Err(e) => {
                    warn!("failed to create Redis connection {}: {}", i, e);
                    // A partially filled pool is usable; an empty one is not.
                    if connections.is_empty() {
                        return Err(e);
                    }
                },
            }
        }

        info!("Redis pool ready with {} connections", connections.len());

        Ok(Self {
            connections: Arc::new(connections),
            next: Arc::new(AtomicUsize::new(0)),
            config,
        })
    }

    /// Hand out the next connection round-robin. ConnectionManager handles
    /// reconnect internally, so a clone is cheap and always usable.
    pub async fn get_connection(&self) -> Result<ConnectionManager, RedisError> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        Ok(self.connections[index].clone())
    }

    pub fn pool_size(&self) -> u32 {
        self.connections.len() as u32
    }

    pub async fn health_check(&self) -> RedisHealth {
        let start = Instant::now();

        let result = async {
            let mut conn = self.get_connection().await?;
            redis::cmd("PING").query_async::<String>(&mut conn).await
        }
        .await;

        let latency_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(_) => RedisHealth {
                is_healthy: true,
                latency_ms,
                pool_size: self.pool_size(),
                error: None,
            },
            Err(e) => RedisHealth {
                is_healthy: false,
                latency_ms,
                pool_size: self.pool_size(),
                error: Some(e.to_string()),
            },
        }
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }
}

async fn create_connection_with_retry(
    client: &Client,
    config: &RedisConfig,
) -> Result<ConnectionManager, RedisError> {
    let mut attempt = 0;
    let mut delay = config.retry_delay;

    loop {
        match ConnectionManager::new(client.clone()).await {
            Ok(conn) => return Ok(conn),
            Err(e) if attempt < config.retry_attempts => {
                attempt += 1;
                warn!(
                    "Redis connection attempt {}/{} failed: {}",
                    attempt, config.retry_attempts, e
                );
                sleep(delay).await;
                delay = (delay * 2).min(MAX_RETRY_DELAY);
            },
            Err(e) => return Err(e),
        }
    }
}

/// Mask credentials in a Redis URL before logging it.
fn mask_redis_url(url: &str) -> String {
    match url.split_once("://") {
        Some((scheme, rest)) => match rest.rsplit_once('@') {
            Some((_credentials, host)) => format!("{}://***@{}", scheme, host),
            None => url.to_string(),
        },
        None => "***".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_redis_url() {
        assert_eq!(
            mask_redis_url("redis://:password@cache:6379/0"),
            "redis://***@cache:6379/0"
        );
        assert_eq!(
            mask_redis_url("redis://cache:6379"),
            "redis://cache:6379"
        );
    }
}
