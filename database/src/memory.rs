//! In-process implementation of the repository contracts.
//!
//! Backs the engine when no Postgres is available and gives tests a store
//! whose contents can be inspected after a run.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use ingest_models::{Connector, Credential, Document};

use crate::repositories::{ConnectorRepository, CredentialRepository, DocumentRepository};

#[derive(Default)]
struct MemoryState {
    connectors: BTreeMap<i64, Connector>,
    credentials: HashMap<i64, Credential>,
    documents: BTreeMap<i64, Document>,
    next_document_id: i64,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
    fail_connector_updates: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a connector; its `docs` are split out into the document table
    pub async fn insert_connector(&self, mut connector: Connector) -> i64 {
        let mut state = self.state.write().await;
        let docs = std::mem::take(&mut connector.docs);
        if let Some(credential) = connector.credential.take() {
            connector.credential_id = Some(credential.id);
            state.credentials.insert(credential.id, credential);
        }
        for mut doc in docs {
            doc.connector_id = connector.id;
            let id = match doc.id {
                Some(id) => id,
                None => {
                    state.next_document_id += 1;
                    state.next_document_id
                }
            };
            state.next_document_id = state.next_document_id.max(id);
            doc.id = Some(id);
            state.documents.insert(id, doc);
        }
        let id = connector.id;
        state.connectors.insert(id, connector);
        id
    }

    pub async fn insert_credential(&self, credential: Credential) {
        self.state.write().await.credentials.insert(credential.id, credential);
    }

    /// Connector row as persisted, without documents
    pub async fn connector(&self, id: i64) -> Option<Connector> {
        self.state.read().await.connectors.get(&id).cloned()
    }

    pub async fn credential(&self, id: i64) -> Option<Credential> {
        self.state.read().await.credentials.get(&id).cloned()
    }

    /// Every document of a connector, archived ones included
    pub async fn documents(&self, connector_id: i64) -> Vec<Document> {
        self.state
            .read()
            .await
            .documents
            .values()
            .filter(|doc| doc.connector_id == connector_id)
            .cloned()
            .collect()
    }

    /// Makes every subsequent connector update fail until switched off
    pub fn fail_connector_updates(&self, fail: bool) {
        self.fail_connector_updates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectorRepository for MemoryStore {
    async fn get_by_id(&self, id: i64) -> Result<Option<Connector>> {
        let state = self.state.read().await;
        let Some(mut connector) = state.connectors.get(&id).cloned() else {
            return Ok(None);
        };
        connector.credential = connector
            .credential_id
            .and_then(|credential_id| state.credentials.get(&credential_id).cloned());
        connector.docs = state
            .documents
            .values()
            .filter(|doc| doc.connector_id == id && doc.deleted_date.is_none())
            .cloned()
            .collect();
        Ok(Some(connector))
    }

    async fn update(&self, connector: &Connector) -> Result<()> {
        if self.fail_connector_updates.load(Ordering::SeqCst) {
            bail!("connector store unavailable");
        }
        let mut state = self.state.write().await;
        let stored = state
            .connectors
            .get_mut(&connector.id)
            .ok_or_else(|| anyhow!("connector {} not found", connector.id))?;

        let mut updated = connector.clone();
        updated.credential = None;
        updated.docs = Vec::new();
        *stored = updated;
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<Connector>> {
        let state = self.state.read().await;
        Ok(state
            .connectors
            .values()
            .filter(|connector| !connector.disabled)
            .map(|connector| {
                let mut connector = connector.clone();
                connector.credential = connector
                    .credential_id
                    .and_then(|credential_id| state.credentials.get(&credential_id).cloned());
                connector
            })
            .collect())
    }
}

#[async_trait]
impl CredentialRepository for MemoryStore {
    async fn update(&self, credential: &Credential) -> Result<()> {
        let mut state = self.state.write().await;
        let stored = state
            .credentials
            .get_mut(&credential.id)
            .ok_or_else(|| anyhow!("credential {} not found", credential.id))?;
        *stored = credential.clone();
        stored.updated_date = Some(Utc::now());
        Ok(())
    }
}

#[async_trait]
impl DocumentRepository for MemoryStore {
    async fn create(&self, document: &mut Document) -> Result<()> {
        let mut state = self.state.write().await;
        let duplicate = state.documents.values().any(|doc| {
            doc.connector_id == document.connector_id
                && doc.source_id == document.source_id
                && doc.deleted_date.is_none()
        });
        if duplicate {
            bail!(
                "document {} already exists for connector {}",
                document.source_id,
                document.connector_id
            );
        }

        state.next_document_id += 1;
        let id = state.next_document_id;
        document.id = Some(id);
        state.documents.insert(id, document.clone());
        Ok(())
    }

    async fn update(&self, document: &Document) -> Result<()> {
        let id = document
            .id
            .ok_or_else(|| anyhow!("document {} has no id", document.source_id))?;
        let mut state = self.state.write().await;
        let stored = state
            .documents
            .get_mut(&id)
            .ok_or_else(|| anyhow!("document {} not found", id))?;
        *stored = document.clone();
        stored.updated_date = Some(Utc::now());
        Ok(())
    }

    async fn archive_by_ids(&self, ids: &[i64]) -> Result<u64> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut archived = 0;
        for id in ids {
            if let Some(doc) = state.documents.get_mut(id) {
                if doc.deleted_date.is_none() {
                    doc.deleted_date = Some(now);
                    archived += 1;
                }
            }
        }
        Ok(archived)
    }
}
