//! Shared domain types for the ingestion services: connectors, documents,
//! credentials, broker payloads and incremental sync state.

pub mod connector;
pub mod credential;
pub mod document;
pub mod error;
pub mod file_type;
pub mod messaging;
pub mod source_type;
pub mod sync_state;

pub use connector::{bucket_name, collection_name, Connector, ConnectorStatus};
pub use credential::{Credential, OAuthProvider, OAuthToken};
pub use document::{blob_url, parse_blob_url, Document, DocumentStatus};
pub use error::ModelError;
pub use file_type::{FileType, FileTypeRecognizer};
pub use messaging::{ChunkingData, ConnectorRequest};
pub use source_type::SourceType;
pub use sync_state::{ChatSyncState, DriveSyncState, SyncState};
