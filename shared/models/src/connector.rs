use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::credential::{Credential, OAuthToken};
use crate::document::Document;
use crate::source_type::SourceType;

/// Run status of a connector
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorStatus {
    ReadyToProcess,
    Pending,
    Processing,
    Success,
    Error,
    Disabled,
    UnableToProcess,
}

impl ConnectorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorStatus::ReadyToProcess => "ready_to_process",
            ConnectorStatus::Pending => "pending",
            ConnectorStatus::Processing => "processing",
            ConnectorStatus::Success => "success",
            ConnectorStatus::Error => "error",
            ConnectorStatus::Disabled => "disabled",
            ConnectorStatus::UnableToProcess => "unable_to_process",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ready_to_process" => Some(ConnectorStatus::ReadyToProcess),
            "pending" => Some(ConnectorStatus::Pending),
            "processing" => Some(ConnectorStatus::Processing),
            "success" => Some(ConnectorStatus::Success),
            "error" => Some(ConnectorStatus::Error),
            "disabled" => Some(ConnectorStatus::Disabled),
            "unable_to_process" => Some(ConnectorStatus::UnableToProcess),
            _ => None,
        }
    }

    /// Whether a run is queued or in flight
    pub fn is_busy(&self) -> bool {
        matches!(self, ConnectorStatus::Pending | ConnectorStatus::Processing)
    }
}

/// A configured data-source instance with its documents and credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connector {
    pub id: i64,
    pub name: String,
    pub source: SourceType,
    /// Source-specific configuration blob
    pub config: serde_json::Value,
    /// Refresh frequency in seconds
    pub refresh_freq: i64,
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub credential_id: Option<i64>,
    pub status: ConnectorStatus,
    pub last_attempt_status: Option<ConnectorStatus>,
    /// Incremental sync state, shaped by the source type
    pub state: serde_json::Value,
    pub last_successful_index_date: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,
    pub disabled: bool,
    pub total_docs_indexed: i64,
    pub created_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<Credential>,
    #[serde(default)]
    pub docs: Vec<Document>,
}

impl Connector {
    pub fn new(id: i64, name: impl Into<String>, source: SourceType, user_id: Uuid) -> Self {
        Self {
            id,
            name: name.into(),
            source,
            config: serde_json::Value::Object(Default::default()),
            refresh_freq: 86_400,
            user_id,
            tenant_id: None,
            credential_id: None,
            status: ConnectorStatus::ReadyToProcess,
            last_attempt_status: None,
            state: serde_json::Value::Null,
            last_successful_index_date: None,
            last_update: None,
            disabled: false,
            total_docs_indexed: 0,
            created_date: Utc::now(),
            credential: None,
            docs: Vec::new(),
        }
    }

    /// Vector collection that holds this connector's embeddings
    pub fn collection_name(&self) -> String {
        collection_name(self.user_id, self.tenant_id)
    }

    /// Blob storage bucket for this connector's raw content
    pub fn bucket_name(&self) -> String {
        bucket_name(self.user_id, self.tenant_id)
    }

    /// Known documents keyed by source id
    pub fn docs_map(&self) -> HashMap<String, Document> {
        self.docs
            .iter()
            .filter(|doc| doc.deleted_date.is_none())
            .map(|doc| (doc.source_id.clone(), doc.clone()))
            .collect()
    }

    /// OAuth token from the credential, falling back to the `token` config key
    pub fn oauth_token(&self) -> Option<OAuthToken> {
        if let Some(token) = self.credential.as_ref().and_then(|c| c.token.clone()) {
            return Some(token);
        }
        self.config
            .get("token")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// A connector is due when it was never indexed or its refresh interval elapsed
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if self.disabled || self.status == ConnectorStatus::Disabled || self.status.is_busy() {
            return false;
        }
        match self.last_successful_index_date {
            None => true,
            Some(last) => last + Duration::seconds(self.refresh_freq) < now,
        }
    }
}

pub fn collection_name(user_id: Uuid, tenant_id: Option<Uuid>) -> String {
    match tenant_id {
        Some(tenant) => format!("tenant_{}", tenant.simple()),
        None => format!("user_{}", user_id.simple()),
    }
}

pub fn bucket_name(user_id: Uuid, tenant_id: Option<Uuid>) -> String {
    match tenant_id {
        Some(tenant) => format!("tenant-{}", tenant),
        None => format!("user-{}", user_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_name_strips_dashes() {
        let tenant = Uuid::parse_str("6fd101cf-ddca-4bef-9fdc-f7fd024c7063").unwrap();
        let user = Uuid::new_v4();
        assert_eq!(collection_name(user, Some(tenant)), "tenant_6fd101cfddca4bef9fdcf7fd024c7063");
        assert!(collection_name(user, None).starts_with("user_"));
        assert!(!collection_name(user, None).contains('-'));
        assert_eq!(bucket_name(user, Some(tenant)), "tenant-6fd101cf-ddca-4bef-9fdc-f7fd024c7063");
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        let mut connector = Connector::new(1, "docs", SourceType::Web, Uuid::new_v4());
        assert!(connector.is_due(now));

        connector.refresh_freq = 3600;
        connector.last_successful_index_date = Some(now - Duration::minutes(5));
        assert!(!connector.is_due(now));

        connector.last_successful_index_date = Some(now - Duration::hours(2));
        assert!(connector.is_due(now));

        connector.status = ConnectorStatus::Processing;
        assert!(!connector.is_due(now));
    }

    #[test]
    fn test_token_falls_back_to_config() {
        let mut connector = Connector::new(1, "drive", SourceType::OneDrive, Uuid::new_v4());
        connector.config = serde_json::json!({
            "token": {"access_token": "a", "token_type": "Bearer", "refresh_token": "r"}
        });
        let token = connector.oauth_token().unwrap();
        assert_eq!(token.access_token, "a");
    }
}
