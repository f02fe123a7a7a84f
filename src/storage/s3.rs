// S3-family storage provider
// One implementation covers AWS S3, DigitalOcean Spaces, Backblaze B2 and
// MinIO; the differences are endpoint, region default and path-style.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::storage::{
    key::validate_key, ObjectInfo, ObjectReader, ProviderKind, PutOptions, StorageError,
    StorageProvider,
};

/// Part size for streamed multipart uploads. Bodies at or below this size go
/// through a single put_object call.
const MULTIPART_CHUNK_SIZE: usize = 8 * 1024 * 1024;

const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Clone)]
pub struct S3Config {
    pub kind: ProviderKind,
    pub bucket: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
    pub force_path_style: bool,
    /// Custom public base URL, e.g. a CDN in front of the bucket.
    pub public_base_url: Option<String>,
}

pub struct S3StorageProvider {
    client: aws_sdk_s3::Client,
    bucket: String,
    region: String,
    endpoint: Option<String>,
    public_base_url: Option<String>,
    kind: ProviderKind,
}

impl S3StorageProvider {
    pub async fn new(config: S3Config) -> Self {
        let region = config
            .region
            .clone()
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "lumina-static",
        );

        let base = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&base)
            .force_path_style(config.force_path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint.clone());
        }

        let client = aws_sdk_s3::Client::from_conf(builder.build());

        Self {
            client,
            bucket: config.bucket,
            region,
            endpoint: config.endpoint,
            public_base_url: config.public_base_url,
            kind: config.kind,
        }
    }

    fn map_error<E>(err: SdkError<E>) -> StorageError
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        if let Some(service_err) = err.as_service_error() {
            match service_err.code() {
                Some("NoSuchKey") | Some("NotFound") | Some("NoSuchBucket") => {
                    return StorageError::NotFound;
                },
                Some("AccessDenied") | Some("InvalidAccessKeyId")
                | Some("SignatureDoesNotMatch") => {
                    return StorageError::AccessDenied;
                },
                _ => {},
            }
        }
        StorageError::Provider(format!("{}", DisplayErrorContext(&err)))
    }

    /// Upload a large body in parts so the whole object never sits in memory.
    async fn put_multipart(
        &self,
        key: &str,
        mut reader: ObjectReader,
        first_chunk: Vec<u8>,
        opts: &PutOptions,
    ) -> Result<(), StorageError> {
        let mut create = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key);
        if let Some(ct) = &opts.content_type {
            create = create.content_type(ct);
        }
        if let Some(cc) = &opts.cache_control {
            create = create.cache_control(cc);
        }
        let started = create.send().await.map_err(Self::map_error)?;
        let upload_id = started
            .upload_id()
            .ok_or_else(|| StorageError::Provider("missing multipart upload id".into()))?
            .to_string();

        let mut parts = Vec::new();
        let mut part_number = 1;
        let mut chunk = first_chunk;

        loop {
            if chunk.is_empty() {
                break;
            }

            let uploaded = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(&upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await;

            let uploaded = match uploaded {
                Ok(u) => u,
                Err(e) => {
                    let _ = self
                        .client
                        .abort_multipart_upload()
                        .bucket(&self.bucket)
                        .key(key)
                        .upload_id(&upload_id)
                        .send()
                        .await;
                    return Err(Self::map_error(e));
                },
            };

            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(uploaded.e_tag().map(str::to_string))
                    .build(),
            );
            part_number += 1;

            chunk = read_chunk(&mut reader, MULTIPART_CHUNK_SIZE).await?;
        }

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(Self::map_error)?;

        Ok(())
    }
}

async fn read_chunk(reader: &mut ObjectReader, limit: usize) -> Result<Vec<u8>, StorageError> {
    let mut chunk = Vec::with_capacity(limit.min(64 * 1024));
    let mut buf = [0u8; 64 * 1024];
    while chunk.len() < limit {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| StorageError::Provider(format!("read body: {}", e)))?;
        if n == 0 {
            break;
        }
        chunk.extend_from_slice(&buf[..n]);
    }
    Ok(chunk)
}

#[async_trait]
impl StorageProvider for S3StorageProvider {
    async fn put(
        &self,
        key: &str,
        mut reader: ObjectReader,
        size: u64,
        opts: PutOptions,
    ) -> Result<(), StorageError> {
        validate_key(key)?;

        let first_chunk = read_chunk(&mut reader, MULTIPART_CHUNK_SIZE).await?;

        if first_chunk.len() < MULTIPART_CHUNK_SIZE {
            // Small body: single round trip.
            if first_chunk.len() as u64 != size {
                return Err(StorageError::Provider(format!(
                    "size mismatch: expected {} bytes, read {}",
                    size,
                    first_chunk.len()
                )));
            }
            return self
                .put_bytes(key, Bytes::from(first_chunk), opts)
                .await;
        }

        debug!(key, size, "starting multipart upload");
        self.put_multipart(key, reader, first_chunk, &opts).await
    }

    async fn put_bytes(
        &self,
        key: &str,
        data: Bytes,
        opts: PutOptions,
    ) -> Result<(), StorageError> {
        validate_key(key)?;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_length(data.len() as i64)
            .body(ByteStream::from(data));

        if let Some(ct) = &opts.content_type {
            request = request.content_type(ct);
        }
        if let Some(cc) = &opts.cache_control {
            request = request.cache_control(cc);
        }
        for (k, v) in &opts.metadata {
            request = request.metadata(k, v);
        }

        request.send().await.map_err(Self::map_error)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<ObjectReader, StorageError> {
        validate_key(key)?;

        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(Self::map_error)?;

        Ok(Box::pin(resp.body.into_async_read()))
    }

    async fn get_bytes(&self, key: &str) -> Result<Bytes, StorageError> {
        validate_key(key)?;

        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(Self::map_error)?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Provider(format!("read object body: {}", e)))?;
        Ok(data.into_bytes())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(Self::map_error)?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        validate_key(key)?;

        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => match Self::map_error(e) {
                StorageError::NotFound => Ok(false),
                other => Err(other),
            },
        }
    }

    fn url(&self, key: &str) -> String {
        if let Some(base) = &self.public_base_url {
            return format!("{}/{}", base.trim_end_matches('/'), key);
        }
        match &self.endpoint {
            Some(endpoint) => format!("{}/{}/{}", endpoint.trim_end_matches('/'), self.bucket, key),
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, key
            ),
        }
    }

    async fn presigned_url(
        &self,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        validate_key(key)?;

        let config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::Provider(format!("presigning config: {}", e)))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(Self::map_error)?;

        Ok(presigned.uri().to_string())
    }

    async fn stat(&self, key: &str) -> Result<ObjectInfo, StorageError> {
        validate_key(key)?;

        let resp = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(Self::map_error)?;

        let last_modified = resp
            .last_modified()
            .and_then(|dt| DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos()));

        Ok(ObjectInfo {
            key: key.to_string(),
            size: resp.content_length().unwrap_or(0).max(0) as u64,
            content_type: resp.content_type().map(str::to_string),
            last_modified,
        })
    }

    fn provider(&self) -> ProviderKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn test_config(endpoint: Option<&str>, base_url: Option<&str>) -> S3Config {
        S3Config {
            kind: ProviderKind::S3,
            bucket: "gallery".to_string(),
            region: None,
            endpoint: endpoint.map(str::to_string),
            access_key: "AKIATEST".to_string(),
            secret_key: "secret".to_string(),
            force_path_style: endpoint.is_some(),
            public_base_url: base_url.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_url_uses_default_region() {
        let provider = S3StorageProvider::new(test_config(None, None)).await;
        let key = crate::storage::derive_key(Uuid::new_v4(), Uuid::new_v4(), "original", "jpg");
        let url = provider.url(&key);
        assert!(url.starts_with("https://gallery.s3.us-east-1.amazonaws.com/images/"));
    }

    #[tokio::test]
    async fn test_url_prefers_public_base() {
        let provider =
            S3StorageProvider::new(test_config(None, Some("https://cdn.example.com/"))).await;
        let key = crate::storage::derive_key(Uuid::new_v4(), Uuid::new_v4(), "large", "webp");
        let url = provider.url(&key);
        assert!(url.starts_with("https://cdn.example.com/images/"));
        assert!(!url.contains("//images"));
    }

    #[tokio::test]
    async fn test_url_with_custom_endpoint() {
        let provider =
            S3StorageProvider::new(test_config(Some("http://localhost:9000"), None)).await;
        let key = crate::storage::derive_key(Uuid::new_v4(), Uuid::new_v4(), "small", "webp");
        assert!(provider
            .url(&key)
            .starts_with("http://localhost:9000/gallery/images/"));
    }
}
