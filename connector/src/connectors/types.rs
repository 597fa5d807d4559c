use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use ingest_models::messaging::{PARAM_FILE_LIMIT, PARAM_SESSION_ID, PARAM_TEAM_ID};
use ingest_models::{Connector as ConnectorModel, ConnectorStatus, Document, FileType, SyncState};

use super::error::ConnectorError;

/// Capacity of the channel between a running connector and the executor
pub const CHANNEL_CAPACITY: usize = 10;

/// Snapshot of the connector's live documents keyed by source id.
/// Connectors only read it; the executor owns every mutation.
pub type KnownDocuments = Arc<HashMap<String, Document>>;

// ============================================================================
// Stream events
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ContentSource {
    /// Bytes produced by the connector itself
    Inline(Bytes),
    /// Download reference resolved by the executor
    Remote {
        url: String,
        authorization: Option<String>,
    },
}

/// Raw content that must be written to blob storage
#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    pub bucket: String,
    pub source: ContentSource,
    /// Append to an existing blob instead of replacing it
    pub append: bool,
}

/// Conversation cursor carried by the item that covers it. It only moves
/// once the item is stored and queued for chunking.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub key: String,
    pub seen: DateTime<Utc>,
    /// Channel whose delta link has to be read again when the item fails
    pub channel: Option<String>,
}

/// A new or modified item found at the source
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeItem {
    pub source_id: String,
    pub url: String,
    pub original_url: Option<String>,
    /// Blob file name used when content is stored
    pub name: String,
    pub mime_type: String,
    pub file_type: FileType,
    pub signature: String,
    pub content: Option<Content>,
    pub checkpoint: Option<Checkpoint>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectorEvent {
    /// The item still exists and did not change
    Seen { source_id: String },
    /// New or modified content; implies `Seen`
    Changed(ChangeItem),
    /// Sync state at the end of the run
    State(SyncState),
    /// The source could not be fully read; deletions must not be reconciled
    Failed { reason: String },
}

impl ConnectorEvent {
    pub fn seen(source_id: impl Into<String>) -> Self {
        ConnectorEvent::Seen {
            source_id: source_id.into(),
        }
    }
}

/// Write half of a connector's event stream.
///
/// Sending fails with `Cancelled` once the token fires or the executor
/// dropped the receiver, which lets connector tasks unwind with `?`.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<ConnectorEvent>,
    cancel: CancellationToken,
}

impl EventSink {
    pub fn channel(cancel: CancellationToken) -> (Self, mpsc::Receiver<ConnectorEvent>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        (Self { tx, cancel }, rx)
    }

    pub async fn emit(&self, event: ConnectorEvent) -> Result<(), ConnectorError> {
        if self.cancel.is_cancelled() {
            return Err(ConnectorError::Cancelled);
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ConnectorError::Cancelled),
            sent = self.tx.send(event) => sent.map_err(|_| ConnectorError::Cancelled),
        }
    }

    pub async fn seen(&self, source_id: impl Into<String>) -> Result<(), ConnectorError> {
        self.emit(ConnectorEvent::seen(source_id)).await
    }

    pub async fn changed(&self, item: ChangeItem) -> Result<(), ConnectorError> {
        self.emit(ConnectorEvent::Changed(item)).await
    }

    pub async fn failed(&self, reason: impl ToString) -> Result<(), ConnectorError> {
        self.emit(ConnectorEvent::Failed {
            reason: reason.to_string(),
        })
        .await
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// ============================================================================
// Run inputs
// ============================================================================

/// Runtime parameters carried by the trigger message
#[derive(Debug, Clone, Default)]
pub struct RunParams {
    params: HashMap<String, String>,
}

impl RunParams {
    pub fn new(params: HashMap<String, String>) -> Self {
        Self { params }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Per-file size limit in bytes; missing or zero falls back to `default`
    pub fn file_limit(&self, default: u64) -> u64 {
        self.get(PARAM_FILE_LIMIT)
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|limit| *limit > 0)
            .unwrap_or(default)
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.get(PARAM_SESSION_ID).and_then(|v| Uuid::parse_str(v).ok())
    }

    pub fn team_id(&self) -> Option<&str> {
        self.get(PARAM_TEAM_ID).filter(|v| !v.is_empty())
    }
}

/// What every connector knows about the record it was built from
#[derive(Debug, Clone)]
pub struct ConnectorBase {
    pub connector_id: i64,
    pub bucket: String,
    pub status: ConnectorStatus,
    pub known: KnownDocuments,
}

impl ConnectorBase {
    pub fn from_model(model: &ConnectorModel) -> Self {
        Self {
            connector_id: model.id,
            bucket: model.bucket_name(),
            status: model.status,
            known: Arc::new(model.docs_map()),
        }
    }

    pub fn known(&self, source_id: &str) -> Option<&Document> {
        self.known.get(source_id)
    }
}

/// Parses the connector's configuration blob into its typed form
pub fn parse_config<T: serde::de::DeserializeOwned>(model: &ConnectorModel) -> Result<T, ConnectorError> {
    let raw = if model.config.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        model.config.clone()
    };
    serde_json::from_value(raw).map_err(|e| {
        ConnectorError::InvalidConfiguration(format!("{} connector config: {}", model.source, e))
    })
}

/// Makes a file name safe to use as a blob key
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != ':')
        .map(|c| match c {
            '-' | '/' | '\\' => '_',
            other => other,
        })
        .collect()
}
