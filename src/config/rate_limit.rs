// Rate limiting policy
// Window sizes per request class. The service enforcing these lives in
// services/rate_limit.rs; this module only declares the numbers.

use serde::{Deserialize, Serialize};

use crate::services::rate_limit::RateLimitConfig;

/// Rate limit policy for the whole API surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Login attempts per IP.
    pub login: RateLimitConfig,
    /// Unauthenticated requests per IP.
    pub unauthenticated: RateLimitConfig,
    /// Authenticated requests per user.
    pub authenticated: RateLimitConfig,
    /// Uploads per user.
    pub upload: RateLimitConfig,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            login: RateLimitConfig {
                max_requests: 5,
                window_seconds: 60,
                burst_limit: None,
                block_duration: 60,
            },
            unauthenticated: RateLimitConfig {
                max_requests: 100,
                window_seconds: 60,
                burst_limit: Some(20),
                block_duration: 60,
            },
            authenticated: RateLimitConfig {
                max_requests: 300,
                window_seconds: 60,
                burst_limit: Some(50),
                block_duration: 60,
            },
            upload: RateLimitConfig {
                max_requests: 50,
                window_seconds: 3600,
                burst_limit: Some(10),
                block_duration: 600,
            },
        }
    }
}

impl RateLimitingConfig {
    pub fn from_env() -> Self {
        let parse = |key: &str, default: u32| -> u32 {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };

        let mut config = Self::default();
        config.login.max_requests = parse("RATE_LIMIT_LOGIN_PER_MINUTE", 5);
        config.unauthenticated.max_requests = parse("RATE_LIMIT_UNAUTHENTICATED_PER_MINUTE", 100);
        config.authenticated.max_requests = parse("RATE_LIMIT_AUTHENTICATED_PER_MINUTE", 300);
        config.upload.max_requests = parse("RATE_LIMIT_UPLOADS_PER_HOUR", 50);
        config
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, limit) in [
            ("login", &self.login),
            ("unauthenticated", &self.unauthenticated),
            ("authenticated", &self.authenticated),
            ("upload", &self.upload),
        ] {
            if limit.max_requests == 0 {
                return Err(format!("{} rate limit must allow at least 1 request", name));
            }
            if limit.window_seconds == 0 {
                return Err(format!("{} rate limit window must be non-zero", name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_policy() {
        let config = RateLimitingConfig::default();
        assert_eq!(config.login.max_requests, 5);
        assert_eq!(config.login.window_seconds, 60);
        assert_eq!(config.upload.max_requests, 50);
        assert_eq!(config.upload.window_seconds, 3600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut config = RateLimitingConfig::default();
        config.login.window_seconds = 0;
        assert!(config.validate().is_err());
    }
}
