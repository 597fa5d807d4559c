//! Blob storage for raw document content (MinIO or any S3-compatible
//! endpoint), signed with AWS Signature V4.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use tracing::debug;

use ingest_config::StorageConfig;
use ingest_models::blob_url;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage request failed with {status} for {bucket}/{key}: {body}")]
    Request {
        status: StatusCode,
        bucket: String,
        key: String,
        body: String,
    },

    #[error("Invalid storage configuration: {0}")]
    Configuration(String),
}

#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Stores `content` and returns its `minio:<bucket>:<key>` url and SHA-256 hex
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        content: Bytes,
    ) -> Result<(String, String), StorageError>;

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError>;

    /// Current content, or `None` when the object does not exist
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Option<Bytes>, StorageError>;
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// ============================================================================
// S3 / MinIO
// ============================================================================

pub struct S3BlobStorage {
    http: Client,
    endpoint: url::Url,
    access_key: String,
    secret_key: String,
    region: String,
}

impl S3BlobStorage {
    pub fn new(http: Client, config: &StorageConfig) -> Result<Self, StorageError> {
        let endpoint = url::Url::parse(&config.endpoint)
            .map_err(|e| StorageError::Configuration(format!("endpoint '{}': {}", config.endpoint, e)))?;
        if endpoint.host_str().is_none() {
            return Err(StorageError::Configuration(format!("endpoint '{}' has no host", config.endpoint)));
        }
        Ok(Self {
            http,
            endpoint,
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            region: config.region.clone(),
        })
    }

    fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Sends a path-style request signed with SigV4
    async fn send(
        &self,
        method: Method,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
        body: Bytes,
    ) -> Result<reqwest::Response, StorageError> {
        let canonical_uri = format!(
            "/{}/{}",
            uri_encode(bucket),
            key.split('/').map(uri_encode).collect::<Vec<_>>().join("/")
        );
        let url = format!(
            "{}://{}{}",
            self.endpoint.scheme(),
            self.host(),
            canonical_uri
        );

        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = sha256_hex(&body);

        let mut headers = vec![
            ("host".to_string(), self.host()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(content_type) = content_type {
            headers.push(("content-type".to_string(), content_type.to_string()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers = headers.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>().join(";");
        let canonical_headers: String = headers.iter().map(|(k, v)| format!("{}:{}\n", k, v.trim())).collect();
        let canonical_request = format!(
            "{}\n{}\n\n{}\n{}\n{}",
            method.as_str(),
            canonical_uri,
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            scope,
            sha256_hex(canonical_request.as_bytes())
        );
        let signing_key = signing_key(&self.secret_key, &date_stamp, &self.region);
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));
        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.access_key, scope, signed_headers, signature
        );

        let mut request = self
            .http
            .request(method, &url)
            .header("authorization", authorization)
            .header("x-amz-content-sha256", payload_hash)
            .header("x-amz-date", amz_date);
        if let Some(content_type) = content_type {
            request = request.header("content-type", content_type);
        }
        Ok(request.body(body).send().await?)
    }

    async fn failure(response: reqwest::Response, bucket: &str, key: &str) -> StorageError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        StorageError::Request {
            status,
            bucket: bucket.to_string(),
            key: key.to_string(),
            body,
        }
    }
}

#[async_trait]
impl BlobStorage for S3BlobStorage {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        content: Bytes,
    ) -> Result<(String, String), StorageError> {
        let checksum = sha256_hex(&content);
        let size = content.len();
        let response = self.send(Method::PUT, bucket, key, Some(content_type), content).await?;
        if !response.status().is_success() {
            return Err(Self::failure(response, bucket, key).await);
        }
        debug!("Uploaded {} bytes to {}/{}", size, bucket, key);
        Ok((blob_url(bucket, key), checksum))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let response = self.send(Method::DELETE, bucket, key, None, Bytes::new()).await?;
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(Self::failure(response, bucket, key).await)
    }

    async fn fetch(&self, bucket: &str, key: &str) -> Result<Option<Bytes>, StorageError> {
        let response = self.send(Method::GET, bucket, key, None, Bytes::new()).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::failure(response, bucket, key).await);
        }
        Ok(Some(response.bytes().await?))
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so this never fails
    match HmacSha256::new_from_slice(key) {
        Ok(mut mac) => {
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        Err(_) => Vec::new(),
    }
}

fn signing_key(secret_key: &str, date_stamp: &str, region: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, b"s3");
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding of one path segment
fn uri_encode(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

// ============================================================================
// In memory
// ============================================================================

/// Blob storage kept in process memory, for development and tests
#[derive(Default)]
pub struct MemoryBlobStorage {
    objects: RwLock<HashMap<(String, String), Bytes>>,
    fail: RwLock<bool>,
}

impl MemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.read().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes every following upload fail
    pub fn fail_uploads(&self, fail: bool) {
        *self.fail.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = fail;
    }
}

#[async_trait]
impl BlobStorage for MemoryBlobStorage {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        _content_type: &str,
        content: Bytes,
    ) -> Result<(String, String), StorageError> {
        if *self.fail.read().unwrap_or_else(|poisoned| poisoned.into_inner()) {
            return Err(StorageError::Request {
                status: StatusCode::SERVICE_UNAVAILABLE,
                bucket: bucket.to_string(),
                key: key.to_string(),
                body: "storage unavailable".to_string(),
            });
        }
        let checksum = sha256_hex(&content);
        self.objects
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert((bucket.to_string(), key.to_string()), content);
        Ok((blob_url(bucket, key), checksum))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.objects
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn fetch(&self, bucket: &str, key: &str) -> Result<Option<Bytes>, StorageError> {
        Ok(self.get(bucket, key))
    }
}
