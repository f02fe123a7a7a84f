// Content-addressed mirror provider backed by the IPFS HTTP API
// Objects are added by content; the key -> CID mapping lives in Redis so the
// provider can answer get/exists/delete in terms of storage keys.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::AsyncCommands;
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::db::RedisPool;
use crate::storage::{
    key::validate_key, ContentAddressedStore, ObjectInfo, ObjectReader, ProviderKind, PutOptions,
    StorageError, StorageProvider,
};

const CID_KEY_PREFIX: &str = "storage:ipfs:cid:";

#[derive(Debug, Clone)]
pub struct IpfsConfig {
    /// Base URL of the IPFS node API, e.g. `http://127.0.0.1:5001`.
    pub api_endpoint: String,
    pub pin_by_default: bool,
    /// Request timeout for node calls.
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
    #[serde(rename = "Size")]
    size: Option<String>,
}

pub struct IpfsStorageProvider {
    http: reqwest::Client,
    api_endpoint: String,
    pin_by_default: bool,
    redis_pool: RedisPool,
}

impl IpfsStorageProvider {
    pub fn new(config: IpfsConfig, redis_pool: RedisPool) -> Result<Self, StorageError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StorageError::Provider(format!("build IPFS client: {}", e)))?;

        Ok(Self {
            http,
            api_endpoint: config.api_endpoint.trim_end_matches('/').to_string(),
            pin_by_default: config.pin_by_default,
            redis_pool,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v0/{}", self.api_endpoint, path)
    }

    fn mapping_key(key: &str) -> String {
        format!("{}{}", CID_KEY_PREFIX, key)
    }

    async fn lookup_cid(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut conn = self
            .redis_pool
            .get_connection()
            .await
            .map_err(|e| StorageError::Provider(format!("redis: {}", e)))?;

        let cid: Option<String> = conn
            .get(Self::mapping_key(key))
            .await
            .map_err(|e| StorageError::Provider(format!("redis: {}", e)))?;
        Ok(cid)
    }

    async fn store_cid(&self, key: &str, cid: &str) -> Result<(), StorageError> {
        let mut conn = self
            .redis_pool
            .get_connection()
            .await
            .map_err(|e| StorageError::Provider(format!("redis: {}", e)))?;

        conn.set::<_, _, ()>(Self::mapping_key(key), cid)
            .await
            .map_err(|e| StorageError::Provider(format!("redis: {}", e)))?;
        Ok(())
    }

    async fn forget_cid(&self, key: &str) -> Result<(), StorageError> {
        let mut conn = self
            .redis_pool
            .get_connection()
            .await
            .map_err(|e| StorageError::Provider(format!("redis: {}", e)))?;

        conn.del::<_, ()>(Self::mapping_key(key))
            .await
            .map_err(|e| StorageError::Provider(format!("redis: {}", e)))?;
        Ok(())
    }

    async fn add_bytes(&self, key: &str, data: Bytes) -> Result<String, StorageError> {
        let part = reqwest::multipart::Part::bytes(data.to_vec()).file_name(key.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let url = format!(
            "{}?pin={}&cid-version=1",
            self.api_url("add"),
            self.pin_by_default
        );

        let resp = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| StorageError::Provider(format!("ipfs add: {}", e)))?;

        if !resp.status().is_success() {
            return Err(StorageError::Provider(format!(
                "ipfs add returned {}",
                resp.status()
            )));
        }

        let parsed: AddResponse = resp
            .json()
            .await
            .map_err(|e| StorageError::Provider(format!("ipfs add response: {}", e)))?;

        debug!(key, cid = %parsed.hash, size = ?parsed.size, "added object to IPFS");
        Ok(parsed.hash)
    }

    async fn node_command(&self, path: &str, cid: &str) -> Result<reqwest::Response, StorageError> {
        let url = format!("{}?arg={}", self.api_url(path), cid);
        let resp = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| StorageError::Provider(format!("ipfs {}: {}", path, e)))?;

        if !resp.status().is_success() {
            return Err(StorageError::Provider(format!(
                "ipfs {} returned {}",
                path,
                resp.status()
            )));
        }
        Ok(resp)
    }
}

#[async_trait]
impl StorageProvider for IpfsStorageProvider {
    async fn put(
        &self,
        key: &str,
        mut reader: ObjectReader,
        size: u64,
        opts: PutOptions,
    ) -> Result<(), StorageError> {
        // Mirror bodies are variant-sized; the node API takes a single
        // multipart body, so buffer here.
        let mut data = Vec::with_capacity(size as usize);
        reader
            .read_to_end(&mut data)
            .await
            .map_err(|e| StorageError::Provider(format!("read body: {}", e)))?;
        self.put_bytes(key, Bytes::from(data), opts).await
    }

    async fn put_bytes(
        &self,
        key: &str,
        data: Bytes,
        _opts: PutOptions,
    ) -> Result<(), StorageError> {
        validate_key(key)?;
        let cid = self.add_bytes(key, data).await?;
        self.store_cid(key, &cid).await
    }

    async fn get(&self, key: &str) -> Result<ObjectReader, StorageError> {
        let data = self.get_bytes(key).await?;
        Ok(Box::pin(std::io::Cursor::new(data)))
    }

    async fn get_bytes(&self, key: &str) -> Result<Bytes, StorageError> {
        validate_key(key)?;
        let cid = self.lookup_cid(key).await?.ok_or(StorageError::NotFound)?;

        let resp = self.node_command("cat", &cid).await?;
        resp.bytes()
            .await
            .map_err(|e| StorageError::Provider(format!("ipfs cat: {}", e)))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        let Some(cid) = self.lookup_cid(key).await? else {
            return Err(StorageError::NotFound);
        };

        // Unpinning is all a node can do; the content becomes garbage
        // collectable rather than being removed immediately.
        if let Err(e) = self.node_command("pin/rm", &cid).await {
            debug!(key, cid = %cid, "unpin failed: {}", e);
        }
        self.forget_cid(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        validate_key(key)?;
        Ok(self.lookup_cid(key).await?.is_some())
    }

    fn url(&self, _key: &str) -> String {
        // URLs require the CID, which needs an async lookup; callers use
        // `cid_for` and their own gateway instead.
        String::new()
    }

    async fn presigned_url(
        &self,
        _key: &str,
        _expires_in: Duration,
    ) -> Result<String, StorageError> {
        Err(StorageError::NotSupported)
    }

    async fn stat(&self, key: &str) -> Result<ObjectInfo, StorageError> {
        let data = self.get_bytes(key).await?;
        Ok(ObjectInfo {
            key: key.to_string(),
            size: data.len() as u64,
            content_type: None,
            last_modified: None,
        })
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::Ipfs
    }
}

#[async_trait]
impl ContentAddressedStore for IpfsStorageProvider {
    async fn cid_for(&self, key: &str) -> Result<Option<String>, StorageError> {
        validate_key(key)?;
        self.lookup_cid(key).await
    }

    async fn pin(&self, cid: &str) -> Result<(), StorageError> {
        self.node_command("pin/add", cid).await.map(|_| ())
    }

    async fn unpin(&self, cid: &str) -> Result<(), StorageError> {
        self.node_command("pin/rm", cid).await.map(|_| ())
    }
}
