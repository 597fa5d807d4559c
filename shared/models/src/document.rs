use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Processing state of a single document
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    InProgress,
    Success,
    Error,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::InProgress => "in_progress",
            DocumentStatus::Success => "success",
            DocumentStatus::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DocumentStatus::Pending),
            "in_progress" => Some(DocumentStatus::InProgress),
            "success" => Some(DocumentStatus::Success),
            "error" => Some(DocumentStatus::Error),
            _ => None,
        }
    }
}

/// One unit of ingested content owned by a connector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Database id, `None` until the document is first persisted
    pub id: Option<i64>,
    pub connector_id: i64,
    /// Stable identifier of the item in the source system
    pub source_id: String,
    /// Storage link; `minio:<bucket>:<file>` once content lives in blob storage
    pub url: String,
    pub original_url: Option<String>,
    pub signature: String,
    pub status: DocumentStatus,
    pub chunking_session: Option<Uuid>,
    pub created_date: DateTime<Utc>,
    pub updated_date: Option<DateTime<Utc>>,
    pub deleted_date: Option<DateTime<Utc>>,
}

impl Document {
    pub fn new(connector_id: i64, source_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: None,
            connector_id,
            source_id: source_id.into(),
            url: url.into(),
            original_url: None,
            signature: String::new(),
            status: DocumentStatus::Pending,
            chunking_session: None,
            created_date: Utc::now(),
            updated_date: None,
            deleted_date: None,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// Blob file name when the url has the form `minio:<bucket>:<file>`
    pub fn blob_file_name(&self) -> Option<&str> {
        parse_blob_url(&self.url).map(|(_, file)| file)
    }
}

/// Builds the storage reference for a blob
pub fn blob_url(bucket: &str, file_name: &str) -> String {
    format!("minio:{}:{}", bucket, file_name)
}

/// Splits `minio:<bucket>:<file>` into bucket and file name
pub fn parse_blob_url(url: &str) -> Option<(&str, &str)> {
    let mut parts = url.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("minio"), Some(bucket), Some(file)) if !bucket.is_empty() && !file.is_empty() => {
            Some((bucket, file))
        }
        _ => None,
    }
}
