use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use ingest_config::VectorConfig;

#[derive(Error, Debug)]
pub enum VectorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Vector store returned {status} for collection {collection}: {body}")]
    Request {
        status: reqwest::StatusCode,
        collection: String,
        body: String,
    },
}

/// Index holding the embeddings of each collection's documents
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Removes every point that belongs to one of `document_ids`
    async fn delete(&self, collection: &str, document_ids: &[i64]) -> Result<(), VectorError>;
}

/// Qdrant over its REST API
pub struct QdrantVectorIndex {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl QdrantVectorIndex {
    pub fn new(client: Client, config: &VectorConfig) -> Self {
        Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait]
impl VectorIndex for QdrantVectorIndex {
    async fn delete(&self, collection: &str, document_ids: &[i64]) -> Result<(), VectorError> {
        if document_ids.is_empty() {
            return Ok(());
        }
        let url = format!("{}/collections/{}/points/delete?wait=true", self.url, collection);
        let filter = json!({
            "filter": {
                "must": [{"key": "document_id", "match": {"any": document_ids}}]
            }
        });

        let mut request = self.client.post(&url).json(&filter);
        if let Some(api_key) = &self.api_key {
            request = request.header("api-key", api_key);
        }
        let response = request.send().await?;

        // a collection that was never created has nothing to delete
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!("Collection {} does not exist, nothing to delete", collection);
            return Ok(());
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VectorError::Request {
                status,
                collection: collection.to_string(),
                body,
            });
        }
        info!("🗑️  Deleted vectors of {} document(s) from {}", document_ids.len(), collection);
        Ok(())
    }
}

/// Records deletions instead of performing them
#[derive(Default)]
pub struct MemoryVectorIndex {
    deleted: Mutex<HashMap<String, Vec<i64>>>,
    fail: Mutex<bool>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deleted(&self, collection: &str) -> Vec<i64> {
        self.deleted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Makes every following delete fail
    pub fn fail_deletes(&self, fail: bool) {
        *self.fail.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = fail;
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn delete(&self, collection: &str, document_ids: &[i64]) -> Result<(), VectorError> {
        if *self.fail.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) {
            return Err(VectorError::Request {
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                collection: collection.to_string(),
                body: "vector store unavailable".to_string(),
            });
        }
        self.deleted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(collection.to_string())
            .or_default()
            .extend_from_slice(document_ids);
        Ok(())
    }
}
