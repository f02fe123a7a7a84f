// Object storage abstraction
// Providers expose a uniform put/get/delete surface over validated storage
// keys; the orchestrator composes a primary provider with an optional
// content-addressed mirror.

pub mod ipfs;
pub mod key;
pub mod local;
pub mod orchestrator;
pub mod s3;

use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::io::AsyncRead;

pub use key::{derive_key, sanitize_filename, validate_key};
pub use orchestrator::StorageOrchestrator;

/// Errors surfaced by storage providers. Provider-specific failures are
/// normalized here and never leak upward in their raw form.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found")]
    NotFound,

    #[error("Access denied by storage backend")]
    AccessDenied,

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Path traversal attempt rejected")]
    PathTraversal,

    #[error("Object already exists")]
    AlreadyExists,

    #[error("Storage provider error: {0}")]
    Provider(String),

    #[error("Operation not supported by this provider")]
    NotSupported,
}

/// Which backend a provider talks to. Stored alongside each image so reads
/// keep working after the configured default changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Local,
    S3,
    Spaces,
    B2,
    Minio,
    Ipfs,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Local => "local",
            ProviderKind::S3 => "s3",
            ProviderKind::Spaces => "spaces",
            ProviderKind::B2 => "b2",
            ProviderKind::Minio => "minio",
            ProviderKind::Ipfs => "ipfs",
        }
    }

    pub fn from_str_tag(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "local" => Some(ProviderKind::Local),
            "s3" => Some(ProviderKind::S3),
            "spaces" => Some(ProviderKind::Spaces),
            "b2" => Some(ProviderKind::B2),
            "minio" => Some(ProviderKind::Minio),
            "ipfs" => Some(ProviderKind::Ipfs),
            _ => None,
        }
    }
}

/// Options attached to an object write.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl PutOptions {
    /// Defaults for processed image variants: content type from the
    /// processor and an immutable long-lived cache policy.
    pub fn for_variant(content_type: &str) -> Self {
        Self {
            content_type: Some(content_type.to_string()),
            cache_control: Some("public, max-age=31536000, immutable".to_string()),
            metadata: HashMap::new(),
        }
    }
}

/// Metadata about a stored object.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// A readable object body. Callers are obligated to consume or drop it
/// promptly; providers may hold a file handle or network stream behind it.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// Capability set every storage backend implements.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Stream an object into storage. `size` is the expected byte count and
    /// is used for integrity checks where the backend supports them.
    async fn put(
        &self,
        key: &str,
        reader: ObjectReader,
        size: u64,
        opts: PutOptions,
    ) -> Result<(), StorageError>;

    /// Write a small object from memory.
    async fn put_bytes(&self, key: &str, data: Bytes, opts: PutOptions) -> Result<(), StorageError>;

    /// Open an object for reading.
    async fn get(&self, key: &str) -> Result<ObjectReader, StorageError>;

    /// Read a small object fully into memory. Reserved for variants that are
    /// known to be small (thumbnails, metadata blobs).
    async fn get_bytes(&self, key: &str) -> Result<Bytes, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Public URL for the object, or empty string when the provider has no
    /// URL concept.
    fn url(&self, key: &str) -> String;

    /// Time-limited signed URL. Providers without signing support return
    /// `StorageError::NotSupported`.
    async fn presigned_url(&self, key: &str, expires_in: Duration)
        -> Result<String, StorageError>;

    async fn stat(&self, key: &str) -> Result<ObjectInfo, StorageError>;

    fn provider(&self) -> ProviderKind;
}

/// Extended capabilities of content-addressed backends. Optional; the upload
/// path never requires it.
#[async_trait]
pub trait ContentAddressedStore: Send + Sync {
    /// Content identifier for a stored key, if the mirror has seen it.
    async fn cid_for(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn pin(&self, cid: &str) -> Result<(), StorageError>;

    async fn unpin(&self, cid: &str) -> Result<(), StorageError>;
}
