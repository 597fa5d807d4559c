//! Runs one connector per trigger message.
//!
//! The executor consumes the connector's event stream, persists changed
//! content and documents, hands every changed document to the chunking
//! stage and archives documents that disappeared from the source. It is the
//! only writer of the known-documents index for the duration of a run.

use anyhow::Context as _;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use ingest_models::{
    ChunkingData, Connector as ConnectorModel, ConnectorRequest, ConnectorStatus, Document, DocumentStatus,
    ModelError, OAuthProvider, OAuthToken, SyncState,
};
use ingest_observability::{log_run_completed, log_run_failed, log_run_rejected, log_run_started, RunCounters};

use super::broker::{BrokerError, Delivery, MessageHandler};
use super::oauth::OAuthError;
use super::storage::StorageError;
use super::vector::VectorError;
use super::EngineServices;
use crate::connectors::{
    self, ChangeItem, Checkpoint, ConnectorError, ConnectorEvent, Content, ContentSource, RunParams,
};

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Connector {0} has no OAuth token")]
    MissingToken(i64),

    #[error("Token refresh failed: {0}")]
    Refresh(#[from] OAuthError),

    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Vector index error: {0}")]
    Vector(#[from] VectorError),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Publish failed: {0}")]
    Publish(#[from] BrokerError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid sync state: {0}")]
    State(#[from] ModelError),
}

impl ExecutorError {
    fn persistence(err: anyhow::Error) -> Self {
        ExecutorError::Persistence(format!("{:#}", err))
    }
}

/// Everything a run accumulates while it consumes the event stream
struct RunState {
    connector_id: i64,
    collection: String,
    session: Option<Uuid>,
    known: HashMap<String, Document>,
    seen: HashSet<String>,
    state: Option<SyncState>,
    counters: RunCounters,
    errors: Vec<String>,
    /// Cursors of items that were stored and queued
    checkpoints: Vec<Checkpoint>,
    /// Cursors of items that failed and must be read again
    rewinds: Vec<Checkpoint>,
    /// False once the source reported it could not be fully read
    complete: bool,
}

impl RunState {
    fn new(model: &ConnectorModel, session: Option<Uuid>) -> Self {
        Self {
            connector_id: model.id,
            collection: model.collection_name(),
            session,
            known: model.docs_map(),
            seen: HashSet::new(),
            state: None,
            counters: RunCounters::default(),
            errors: Vec::new(),
            checkpoints: Vec::new(),
            rewinds: Vec::new(),
            complete: true,
        }
    }

    fn fail(&mut self, reason: impl Into<String>) {
        self.errors.push(reason.into());
    }

    fn item_failed(&mut self, reason: impl Into<String>) {
        self.counters.failed += 1;
        self.fail(reason);
    }

    fn failed(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Moves chat cursors for stored conversations and rewinds the channels
    /// of failed ones
    fn apply_checkpoints(&mut self) {
        let Some(SyncState::Chat(state)) = self.state.as_mut() else {
            return;
        };
        for checkpoint in self.checkpoints.drain(..) {
            state.advance(&checkpoint.key, checkpoint.seen);
        }
        for checkpoint in self.rewinds.drain(..) {
            if let Some(channel) = checkpoint.channel.as_deref() {
                state.forget_delta_link(channel);
            }
        }
    }
}

pub struct Executor {
    services: EngineServices,
    cancel: CancellationToken,
}

impl Executor {
    pub fn new(services: EngineServices, cancel: CancellationToken) -> Self {
        Self { services, cancel }
    }

    /// Consumes triggers until the token fires or the broker is closed
    pub async fn listen(self: Arc<Self>) -> Result<(), BrokerError> {
        let broker = self.services.broker.clone();
        let topics = self.services.topics.clone();
        let cancel = self.cancel.clone();
        info!(
            "🚀 Executor listening on {}:{}",
            topics.connector_stream, topics.executor_topic
        );
        let handler: Arc<dyn MessageHandler> = self;
        broker
            .listen(cancel, &topics.connector_stream, &topics.executor_topic, handler)
            .await
    }

    /// Runs the connector named by the trigger.
    ///
    /// Returns `Ok` whenever the trigger should be acknowledged, including
    /// runs rejected before execution. An error means the final connector
    /// update could not be stored and the trigger must be redelivered.
    #[instrument(skip(self, request), fields(connector_id = request.connector_id))]
    pub async fn run(&self, request: ConnectorRequest) -> anyhow::Result<()> {
        let connector_id = request.connector_id;
        let repos = &self.services.repos;

        let loaded = repos
            .connectors
            .get_by_id(connector_id)
            .await
            .with_context(|| format!("failed to load connector {}", connector_id))?;
        let Some(mut model) = loaded else {
            error!("❌ Connector {} not found", connector_id);
            log_run_rejected(connector_id, "unknown", "connector not found");
            return Ok(());
        };
        let source = model.source.to_string();
        info!("▶️ Running connector {} [{}] ({})", model.name, connector_id, source);

        let loaded_status = model.status;
        model.status = ConnectorStatus::Processing;
        repos
            .connectors
            .update(&model)
            .await
            .with_context(|| format!("failed to mark connector {} as processing", connector_id))?;
        log_run_started(connector_id, &source);

        if let Err(e) = self.refresh_token(&mut model).await {
            return self.reject(model, &source, e).await;
        }

        // connectors see the status the run was triggered with
        model.status = loaded_status;
        let built = connectors::build(&model, &self.services.context);
        model.status = ConnectorStatus::Processing;
        let connector = match built {
            Ok(connector) => connector,
            Err(e) => return self.reject(model, &source, e.into()).await,
        };

        let started = Instant::now();
        let params = RunParams::new(request.params);
        let mut run = RunState::new(&model, params.session_id());
        let mut events = connector.execute(self.cancel.child_token(), params);

        while let Some(event) = events.recv().await {
            match event {
                ConnectorEvent::Seen { source_id } => {
                    run.counters.seen += 1;
                    run.seen.insert(source_id);
                }
                ConnectorEvent::Changed(mut item) => {
                    run.counters.changed += 1;
                    run.seen.insert(item.source_id.clone());
                    let checkpoint = item.checkpoint.take();
                    let queued = self.process_item(&mut run, item).await;
                    if let Some(checkpoint) = checkpoint {
                        if queued {
                            run.checkpoints.push(checkpoint);
                        } else {
                            run.rewinds.push(checkpoint);
                        }
                    }
                }
                ConnectorEvent::State(state) => run.state = Some(state),
                ConnectorEvent::Failed { reason } => {
                    warn!("⚠️ Connector {} could not read its source: {}", connector_id, reason);
                    run.complete = false;
                    run.fail(reason);
                }
            }
        }

        if self.cancel.is_cancelled() {
            warn!("⚠️ Run of connector {} was cancelled", connector_id);
            run.complete = false;
            run.fail("run cancelled");
        }

        if run.complete {
            if let Err(e) = self.reconcile(&mut run).await {
                error!("❌ Reconciliation failed for connector {}: {}", connector_id, e);
                run.fail(e.to_string());
            }
        } else {
            warn!("⚠️ Skipping reconciliation for connector {}: source only partially read", connector_id);
        }

        self.finalize(model, run, &source, started).await
    }

    // ========================================================================
    // Pre-run steps
    // ========================================================================

    async fn refresh_token(&self, model: &mut ConnectorModel) -> Result<(), ExecutorError> {
        let Some(provider) = model.source.oauth_provider() else {
            return Ok(());
        };

        if let Some(credential) = model.credential.as_mut() {
            if credential.provider == OAuthProvider::Custom {
                return Ok(());
            }
            if let Some(token) = credential.token.clone() {
                credential.token = Some(self.refresh_with(provider, &token).await?);
                credential.updated_date = Some(Utc::now());
                self.services
                    .repos
                    .credentials
                    .update(credential)
                    .await
                    .map_err(ExecutorError::persistence)?;
                return Ok(());
            }
        }

        let token: OAuthToken = model
            .config
            .get("token")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .ok_or(ExecutorError::MissingToken(model.id))?;
        let refreshed = serde_json::to_value(self.refresh_with(provider, &token).await?)?;
        if let Some(config) = model.config.as_object_mut() {
            config.insert("token".to_string(), refreshed);
        }
        self.services
            .repos
            .connectors
            .update(model)
            .await
            .map_err(ExecutorError::persistence)
    }

    /// The gateway may omit fields that did not change
    async fn refresh_with(&self, provider: OAuthProvider, token: &OAuthToken) -> Result<OAuthToken, ExecutorError> {
        let mut refreshed = self.services.oauth.refresh(provider, token).await?;
        if refreshed.refresh_token.is_empty() {
            refreshed.refresh_token = token.refresh_token.clone();
        }
        if refreshed.token_type.is_empty() {
            refreshed.token_type = token.token_type.clone();
        }
        Ok(refreshed)
    }

    async fn reject(&self, mut model: ConnectorModel, source: &str, reason: ExecutorError) -> anyhow::Result<()> {
        error!("❌ Connector {} cannot run: {}", model.id, reason);
        model.status = ConnectorStatus::UnableToProcess;
        model.last_attempt_status = Some(ConnectorStatus::UnableToProcess);
        model.last_update = Some(Utc::now());
        self.services
            .repos
            .connectors
            .update(&model)
            .await
            .with_context(|| format!("failed to record rejected run of connector {}", model.id))?;
        log_run_rejected(model.id, source, &reason.to_string());
        Ok(())
    }

    // ========================================================================
    // Changed items
    // ========================================================================

    /// Stores, records and queues one item; returns whether it reached the
    /// chunking stage
    async fn process_item(&self, run: &mut RunState, mut item: ChangeItem) -> bool {
        let existing = run.known.get(&item.source_id).cloned();

        if let Some(content) = item.content.take() {
            match self.store_content(&item, content).await {
                Ok(url) => item.url = url,
                Err(e) => {
                    error!("❌ Failed to store content of {}: {}", item.source_id, e);
                    run.item_failed(format!("{}: {}", item.source_id, e));
                    match existing {
                        Some(doc) => self.mark_failed(run, doc).await,
                        None => self.record_failed(run, &item).await,
                    }
                    return false;
                }
            }
        }

        let mut doc = existing.unwrap_or_else(|| Document::new(run.connector_id, &item.source_id, &item.url));
        doc.url = item.url.clone();
        if item.original_url.is_some() {
            doc.original_url = item.original_url.clone();
        }
        doc.signature = item.signature.clone();
        doc.status = DocumentStatus::Pending;
        doc.chunking_session = run.session;
        doc.updated_date = Some(Utc::now());

        let documents = &self.services.repos.documents;
        let persisted = if doc.is_persisted() {
            documents.update(&doc).await
        } else {
            documents.create(&mut doc).await
        };
        let document_id = match (persisted, doc.id) {
            (Ok(()), Some(id)) => id,
            (Ok(()), None) => {
                error!("❌ Document {} was stored without an id", item.source_id);
                run.item_failed(format!("{}: missing document id", item.source_id));
                return false;
            }
            (Err(e), _) => {
                error!("❌ Failed to persist document {}: {:#}", item.source_id, e);
                run.item_failed(format!("{}: {:#}", item.source_id, e));
                if doc.is_persisted() {
                    self.mark_failed(run, doc).await;
                }
                return false;
            }
        };

        let data = ChunkingData {
            url: doc.url.clone(),
            document_id,
            file_type: item.file_type,
            collection_name: run.collection.clone(),
        };
        match self.publish_chunking(&data).await {
            Ok(()) => {
                debug!("Queued document {} for chunking", document_id);
                doc.status = DocumentStatus::Success;
                if let Err(e) = documents.update(&doc).await {
                    warn!("⚠️ Could not record status of document {}: {:#}", document_id, e);
                }
                run.known.insert(doc.source_id.clone(), doc);
                true
            }
            Err(e) => {
                error!("❌ Failed to queue document {} for chunking: {}", document_id, e);
                run.item_failed(format!("{}: {}", item.source_id, e));
                self.mark_failed(run, doc).await;
                false
            }
        }
    }

    async fn store_content(&self, item: &ChangeItem, content: Content) -> Result<String, ExecutorError> {
        let storage = &self.services.storage;
        let mut bytes = match content.source {
            ContentSource::Inline(bytes) => bytes,
            ContentSource::Remote { url, authorization } => self.download(&url, authorization.as_deref()).await?,
        };

        if content.append {
            if let Some(existing) = storage.fetch(&content.bucket, &item.name).await? {
                let mut joined = BytesMut::with_capacity(existing.len() + bytes.len());
                joined.extend_from_slice(&existing);
                joined.extend_from_slice(&bytes);
                bytes = joined.freeze();
            }
        }

        let (url, checksum) = storage
            .upload(&content.bucket, &item.name, &item.mime_type, bytes)
            .await?;
        debug!("Stored {} (sha256 {})", url, checksum);
        Ok(url)
    }

    async fn download(&self, url: &str, authorization: Option<&str>) -> Result<Bytes, ExecutorError> {
        let mut request = self.services.context.http.get(url);
        if let Some(authorization) = authorization {
            request = request.header(reqwest::header::AUTHORIZATION, authorization);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ExecutorError::Download(format!("{}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(ExecutorError::Download(format!("HTTP {} for {}", response.status(), url)));
        }
        response
            .bytes()
            .await
            .map_err(|e| ExecutorError::Download(format!("{}: {}", url, e)))
    }

    async fn publish_chunking(&self, data: &ChunkingData) -> Result<(), ExecutorError> {
        let topics = &self.services.topics;
        let payload = serde_json::to_vec(data)?;
        self.services
            .broker
            .publish(&topics.chunking_stream, &topics.chunking_topic, payload)
            .await?;
        Ok(())
    }

    /// Best effort: the signature is cleared so the next run picks the item up again
    async fn mark_failed(&self, run: &mut RunState, mut doc: Document) {
        doc.status = DocumentStatus::Error;
        doc.signature.clear();
        doc.updated_date = Some(Utc::now());
        if let Err(e) = self.services.repos.documents.update(&doc).await {
            warn!("⚠️ Could not mark document {} as failed: {:#}", doc.source_id, e);
        }
        run.known.insert(doc.source_id.clone(), doc);
    }

    /// Best effort: keeps a new item whose content could not be stored visible
    /// as an errored document without a signature
    async fn record_failed(&self, run: &mut RunState, item: &ChangeItem) {
        let mut doc = Document::new(run.connector_id, &item.source_id, &item.url);
        doc.original_url = item.original_url.clone();
        doc.status = DocumentStatus::Error;
        doc.chunking_session = run.session;
        doc.updated_date = Some(Utc::now());
        match self.services.repos.documents.create(&mut doc).await {
            Ok(()) => {
                run.known.insert(doc.source_id.clone(), doc);
            }
            Err(e) => warn!("⚠️ Could not record failed document {}: {:#}", item.source_id, e),
        }
    }

    // ========================================================================
    // Post-run steps
    // ========================================================================

    async fn reconcile(&self, run: &mut RunState) -> Result<(), ExecutorError> {
        let mut stale: Vec<(String, i64)> = run
            .known
            .iter()
            .filter(|(source_id, _)| !run.seen.contains(*source_id))
            .filter_map(|(source_id, doc)| doc.id.map(|id| (source_id.clone(), id)))
            .collect();
        if stale.is_empty() {
            return Ok(());
        }
        stale.sort_by_key(|(_, id)| *id);
        let ids: Vec<i64> = stale.iter().map(|(_, id)| *id).collect();

        let archived = self
            .services
            .repos
            .documents
            .archive_by_ids(&ids)
            .await
            .map_err(ExecutorError::persistence)?;
        for (source_id, _) in &stale {
            run.known.remove(source_id);
        }
        run.counters.archived = ids.len();
        info!("🗑️ Archived {} document(s) of connector {}", archived, run.connector_id);

        self.services.vector.delete(&run.collection, &ids).await?;
        Ok(())
    }

    async fn finalize(
        &self,
        mut model: ConnectorModel,
        mut run: RunState,
        source: &str,
        started: Instant,
    ) -> anyhow::Result<()> {
        let now = Utc::now();
        let outcome = if run.failed() {
            ConnectorStatus::Error
        } else {
            ConnectorStatus::Success
        };

        model.status = outcome;
        model.last_attempt_status = Some(outcome);
        if outcome == ConnectorStatus::Success {
            model.last_successful_index_date = Some(now);
        }
        model.last_update = Some(now);
        model.total_docs_indexed = run.known.len() as i64;
        run.apply_checkpoints();
        if let Some(state) = &run.state {
            match state.encode() {
                Ok(encoded) => model.state = encoded,
                Err(e) => error!("❌ Could not encode sync state of connector {}: {}", model.id, e),
            }
        }

        self.services
            .repos
            .connectors
            .update(&model)
            .await
            .with_context(|| format!("failed to finalize connector {}", model.id))?;

        let duration_ms = started.elapsed().as_millis() as u64;
        if run.failed() {
            let reason = run.errors.join("; ");
            log_run_failed(model.id, source, &reason, run.counters, duration_ms);
            warn!("⚠️ Connector {} finished with errors: {}", model.id, reason);
        } else {
            log_run_completed(model.id, source, run.counters, duration_ms);
            info!("✅ Connector {} finished in {} ms", model.id, duration_ms);
        }
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for Executor {
    async fn handle(&self, delivery: &Delivery) -> anyhow::Result<()> {
        let request: ConnectorRequest = match serde_json::from_slice(&delivery.payload) {
            Ok(request) => request,
            Err(e) => {
                error!("❌ Dropping undecodable trigger {}: {}", delivery.id, e);
                return Ok(());
            }
        };
        if delivery.delivery_count > 1 {
            info!(
                "🔁 Delivery #{} of trigger for connector {}",
                delivery.delivery_count, request.connector_id
            );
        }
        self.run(request).await
    }
}
