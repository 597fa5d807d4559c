// Repository contracts consumed by the connector engine

pub mod connector;
pub mod credential;
pub mod document;

pub use connector::PgConnectorRepository;
pub use credential::PgCredentialRepository;
pub use document::PgDocumentRepository;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;

use ingest_models::{Connector, Credential, Document};

#[async_trait]
pub trait ConnectorRepository: Send + Sync {
    /// Loads the connector together with its live documents and credential
    async fn get_by_id(&self, id: i64) -> Result<Option<Connector>>;

    /// Persists status, run bookkeeping, config and sync state
    async fn update(&self, connector: &Connector) -> Result<()>;

    /// Connectors that are not deleted, with credentials but without documents
    async fn list_active(&self) -> Result<Vec<Connector>>;
}

#[async_trait]
pub trait CredentialRepository: Send + Sync {
    async fn update(&self, credential: &Credential) -> Result<()>;
}

#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Inserts the document and stores the new id on it
    async fn create(&self, document: &mut Document) -> Result<()>;

    async fn update(&self, document: &Document) -> Result<()>;

    /// Soft-deletes the given documents, returning how many rows changed
    async fn archive_by_ids(&self, ids: &[i64]) -> Result<u64>;
}

/// The three repositories handed to the engine services
#[derive(Clone)]
pub struct Repositories {
    pub connectors: Arc<dyn ConnectorRepository>,
    pub credentials: Arc<dyn CredentialRepository>,
    pub documents: Arc<dyn DocumentRepository>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            connectors: Arc::new(PgConnectorRepository::new(pool.clone())),
            credentials: Arc::new(PgCredentialRepository::new(pool.clone())),
            documents: Arc::new(PgDocumentRepository::new(pool)),
        }
    }

    pub fn memory(store: crate::memory::MemoryStore) -> Self {
        Self {
            connectors: Arc::new(store.clone()),
            credentials: Arc::new(store.clone()),
            documents: Arc::new(store),
        }
    }
}
