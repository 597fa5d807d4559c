//! Payloads exchanged over the message broker.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::file_type::FileType;

/// Runtime parameter: maximum file size in bytes
pub const PARAM_FILE_LIMIT: &str = "file_limit";
/// Runtime parameter: chunking session the run belongs to
pub const PARAM_SESSION_ID: &str = "session_id";
/// Runtime parameter: resolved Microsoft Teams team id
pub const PARAM_TEAM_ID: &str = "team_id";

/// Trigger asking the executor to run one connector
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConnectorRequest {
    pub connector_id: i64,
    #[serde(default)]
    pub params: HashMap<String, String>,
}

impl ConnectorRequest {
    pub fn new(connector_id: i64) -> Self {
        Self {
            connector_id,
            params: HashMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Hands a changed document to the chunking stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkingData {
    pub url: String,
    pub document_id: i64,
    pub file_type: FileType,
    pub collection_name: String,
}
