// Shared fixtures for the engine integration tests
#![allow(dead_code)]

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use connector_engine::connectors::ConnectorContext;
use connector_engine::services::broker::{DeliveryPolicy, InMemoryBroker};
use connector_engine::services::storage::MemoryBlobStorage;
use connector_engine::services::vector::MemoryVectorIndex;
use connector_engine::services::{EngineServices, Executor, OAuthClient, Topics};
use ingest_config::{ApiEndpoints, GB};
use ingest_database::{MemoryStore, Repositories};
use ingest_models::{ChunkingData, ConnectorRequest, Credential, OAuthProvider, OAuthToken};

pub struct TestEngine {
    pub store: MemoryStore,
    pub broker: Arc<InMemoryBroker>,
    pub storage: Arc<MemoryBlobStorage>,
    pub vector: Arc<MemoryVectorIndex>,
    pub services: EngineServices,
}

impl TestEngine {
    /// Engine whose third-party APIs all live under `base_url`
    pub fn new(base_url: &str) -> Self {
        Self::with_policy(base_url, DeliveryPolicy::default())
    }

    pub fn with_policy(base_url: &str, policy: DeliveryPolicy) -> Self {
        let store = MemoryStore::new();
        let broker = Arc::new(InMemoryBroker::new(policy));
        let storage = Arc::new(MemoryBlobStorage::new());
        let vector = Arc::new(MemoryVectorIndex::new());
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("http client");
        let endpoints = ApiEndpoints {
            graph_url: base_url.to_string(),
            google_drive_url: base_url.to_string(),
        };

        let services = EngineServices {
            repos: Repositories::memory(store.clone()),
            broker: broker.clone(),
            storage: storage.clone(),
            vector: vector.clone(),
            oauth: OAuthClient::new(http.clone(), base_url),
            context: ConnectorContext::new(http, endpoints, GB),
            topics: Topics::default(),
        };

        Self {
            store,
            broker,
            storage,
            vector,
            services,
        }
    }

    pub fn executor(&self) -> Executor {
        Executor::new(self.services.clone(), CancellationToken::new())
    }

    /// Chunking messages published so far
    pub fn chunking(&self) -> Vec<ChunkingData> {
        let topics = &self.services.topics;
        self.broker
            .pending(&topics.chunking_stream, &topics.chunking_topic)
            .iter()
            .map(|payload| serde_json::from_slice(payload).expect("chunking payload"))
            .collect()
    }

    /// Triggers waiting on the executor topic
    pub fn triggers(&self) -> Vec<ConnectorRequest> {
        let topics = &self.services.topics;
        self.broker
            .pending(&topics.connector_stream, &topics.executor_topic)
            .iter()
            .map(|payload| serde_json::from_slice(payload).expect("trigger payload"))
            .collect()
    }
}

pub fn token() -> OAuthToken {
    OAuthToken {
        access_token: "access".to_string(),
        token_type: "Bearer".to_string(),
        refresh_token: "refresh".to_string(),
        expiry: None,
    }
}

/// Credential managed outside the OAuth gateway, so no refresh happens
pub fn custom_credential(id: i64, user_id: Uuid) -> Credential {
    Credential {
        id,
        user_id,
        tenant_id: None,
        source: "custom".to_string(),
        provider: OAuthProvider::Custom,
        token: Some(token()),
        custom: serde_json::json!({}),
        created_date: Utc::now(),
        updated_date: None,
    }
}

/// Polls `check` until it holds or two seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
