// Centralized configuration
// Every environment variable is read exactly once, at startup, into a global
// AppConfig. Components receive plain config structs from here rather than
// touching the environment themselves.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Global application configuration loaded once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(|| {
    #[cfg(test)]
    dotenv::dotenv().ok();

    AppConfig::from_env().expect("Failed to load configuration")
});

pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisSettings,
    pub jwt: JwtSettings,
    pub security: SecuritySettings,
    pub storage: StorageSettings,
    pub upload: UploadSettings,
    pub processor: ProcessorSettings,
    pub scanner: ScannerSettings,
    pub disable_embedded_migrations: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub environment: Environment,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Environment {
    Development,
    Test,
    Staging,
    Production,
}

impl From<String> for Environment {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "test" => Environment::Test,
            "staging" | "stage" => Environment::Staging,
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: u64,
    pub idle_timeout: u64,
    pub max_lifetime: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    pub url: String,
    pub pool_size: u32,
    pub connection_timeout: u64,
    pub command_timeout: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
}

/// Ed25519 key material and token lifetimes. The private key never leaves
/// this process; only the public key is needed to verify tokens.
#[derive(Clone, Serialize, Deserialize)]
pub struct JwtSettings {
    pub private_key_pem: String,
    pub public_key_pem: String,
    /// Access token lifetime in seconds.
    pub access_ttl: u64,
    /// Refresh token lifetime in seconds.
    pub refresh_ttl: u64,
    pub audience: String,
    pub issuer: String,
}

impl std::fmt::Debug for JwtSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSettings")
            .field("private_key_pem", &"<redacted>")
            .field("public_key_pem", &"<redacted>")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("audience", &self.audience)
            .field("issuer", &self.issuer)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecuritySettings {
    pub cors_allowed_origins: Vec<String>,
    pub enable_rate_limiting: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// One of: local, s3, spaces, b2, minio.
    pub provider: String,
    pub local_path: String,
    pub s3: S3Settings,
    pub ipfs: IpfsSettings,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct S3Settings {
    pub endpoint: Option<String>,
    pub bucket: String,
    pub region: Option<String>,
    pub access_key: String,
    pub secret_key: String,
    pub force_path_style: bool,
    pub public_base_url: Option<String>,
}

impl std::fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Settings")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("access_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .field("force_path_style", &self.force_path_style)
            .field("public_base_url", &self.public_base_url)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpfsSettings {
    pub enabled: bool,
    pub api_endpoint: String,
    pub pin_by_default: bool,
    pub async_upload: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSettings {
    pub max_upload_size_bytes: u64,
    pub max_image_width: u32,
    pub max_image_height: u32,
    pub max_pixel_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorSettings {
    pub memory_mb: u64,
    pub max_concurrent: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerSettings {
    pub enabled: bool,
    pub endpoint: String,
    pub timeout_seconds: u64,
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.server.environment == Environment::Production
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let get_required = |key: &str| -> Result<String, ConfigError> {
            env::var(key).map_err(|_| ConfigError::MissingVar(key.to_string()))
        };

        let get_or_default = |key: &str, default: &str| -> String {
            env::var(key).unwrap_or_else(|_| default.to_string())
        };

        let parse_u32 = |key: &str, default: &str| -> Result<u32, ConfigError> {
            get_or_default(key, default).parse().map_err(|_| {
                ConfigError::InvalidValue(key.to_string(), "not a valid u32".to_string())
            })
        };

        let parse_u64 = |key: &str, default: &str| -> Result<u64, ConfigError> {
            get_or_default(key, default).parse().map_err(|_| {
                ConfigError::InvalidValue(key.to_string(), "not a valid u64".to_string())
            })
        };

        let parse_bool = |key: &str, default: &str| -> bool {
            get_or_default(key, default).to_lowercase() == "true"
        };

        // A key may be supplied inline or as a file path; inline wins.
        let load_pem = |inline_key: &str, file_key: &str| -> Result<String, ConfigError> {
            if let Ok(pem) = env::var(inline_key) {
                return Ok(pem);
            }
            let path = env::var(file_key)
                .map_err(|_| ConfigError::MissingVar(inline_key.to_string()))?;
            std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::InvalidValue(file_key.to_string(), e.to_string()))
        };

        let environment = Environment::from(get_or_default("ENVIRONMENT", "development"));

        let server = ServerConfig {
            bind_address: get_or_default("BIND_ADDRESS", "0.0.0.0:8080"),
            environment,
        };

        let database = DatabaseConfig {
            url: get_required("DATABASE_URL")?,
            max_connections: parse_u32("DATABASE_MAX_CONNECTIONS", "50")?,
            min_connections: parse_u32("DATABASE_MIN_CONNECTIONS", "5")?,
            connect_timeout: parse_u64("DATABASE_CONNECT_TIMEOUT", "30")?,
            idle_timeout: parse_u64("DATABASE_IDLE_TIMEOUT", "600")?,
            max_lifetime: parse_u64("DATABASE_MAX_LIFETIME", "1800")?,
        };

        let redis = RedisSettings {
            url: get_or_default("REDIS_URL", "redis://localhost:6379"),
            pool_size: parse_u32("REDIS_POOL_SIZE", "16")?,
            connection_timeout: parse_u64("REDIS_CONNECTION_TIMEOUT", "5")?,
            command_timeout: parse_u64("REDIS_COMMAND_TIMEOUT", "5")?,
            retry_attempts: parse_u32("REDIS_RETRY_ATTEMPTS", "3")?,
            retry_delay_ms: parse_u64("REDIS_RETRY_DELAY_MS", "100")?,
        };

        let jwt = JwtSettings {
            private_key_pem: load_pem("JWT_PRIVATE_KEY_PEM", "JWT_PRIVATE_KEY_FILE")?,
            public_key_pem: load_pem("JWT_PUBLIC_KEY_PEM", "JWT_PUBLIC_KEY_FILE")?,
            access_ttl: parse_u64("ACCESS_TOKEN_TTL", "900")?,
            refresh_ttl: parse_u64("REFRESH_TOKEN_TTL", "604800")?,
            audience: get_or_default("JWT_AUDIENCE", "lumina"),
            issuer: get_or_default("JWT_ISSUER", "lumina"),
        };

        let security = SecuritySettings {
            cors_allowed_origins: get_or_default("CORS_ALLOWED_ORIGINS", "*")
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            enable_rate_limiting: parse_bool("ENABLE_RATE_LIMITING", "true"),
        };

        let storage = StorageSettings {
            provider: get_or_default("STORAGE_PROVIDER", "local"),
            local_path: get_or_default("LOCAL_STORAGE_PATH", "./data/storage"),
            s3: S3Settings {
                endpoint: env::var("S3_ENDPOINT").ok(),
                bucket: get_or_default("S3_BUCKET", ""),
                region: env::var("S3_REGION").ok(),
                access_key: get_or_default("S3_ACCESS_KEY", ""),
                secret_key: get_or_default("S3_SECRET_KEY", ""),
                force_path_style: parse_bool("S3_FORCE_PATH_STYLE", "false"),
                public_base_url: env::var("S3_PUBLIC_BASE_URL").ok(),
            },
            ipfs: IpfsSettings {
                enabled: parse_bool("IPFS_ENABLED", "false"),
                api_endpoint: get_or_default("IPFS_API_ENDPOINT", "http://127.0.0.1:5001"),
                pin_by_default: parse_bool("IPFS_PIN_BY_DEFAULT", "true"),
                async_upload: parse_bool("IPFS_ASYNC_UPLOAD", "true"),
            },
        };

        // An s3-family provider needs credentials; catch the gap at startup
        // rather than on the first upload.
        if storage.provider != "local" && storage.provider != "ipfs" {
            if storage.s3.bucket.is_empty() {
                return Err(ConfigError::MissingVar("S3_BUCKET".to_string()));
            }
            if storage.s3.access_key.is_empty() || storage.s3.secret_key.is_empty() {
                return Err(ConfigError::MissingVar("S3_ACCESS_KEY".to_string()));
            }
        }

        let upload = UploadSettings {
            max_upload_size_bytes: parse_u64("MAX_UPLOAD_SIZE_BYTES", "10485760")?,
            max_image_width: parse_u32("MAX_IMAGE_WIDTH", "8192")?,
            max_image_height: parse_u32("MAX_IMAGE_HEIGHT", "8192")?,
            max_pixel_count: parse_u64("MAX_PIXEL_COUNT", "100000000")?,
        };

        let processor = ProcessorSettings {
            memory_mb: parse_u64("PROCESSOR_MEMORY_MB", "256")?,
            max_concurrent: parse_u32("PROCESSOR_MAX_CONCURRENT", "32")? as usize,
        };

        let scanner = ScannerSettings {
            enabled: parse_bool("MALWARE_SCAN_ENABLED", "false"),
            endpoint: get_or_default("MALWARE_SCAN_ENDPOINT", "127.0.0.1:3310"),
            timeout_seconds: parse_u64("MALWARE_SCAN_TIMEOUT_SECONDS", "30")?,
        };

        Ok(AppConfig {
            server,
            database,
            redis,
            jwt,
            security,
            storage,
            upload,
            processor,
            scanner,
            disable_embedded_migrations: parse_bool("DISABLE_EMBEDDED_MIGRATIONS", "false"),
        })
    }
}
