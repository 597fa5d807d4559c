// Row types as stored in Postgres, and their mapping to domain models

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use ingest_models::{
    Connector, ConnectorStatus, Credential, Document, DocumentStatus, OAuthProvider, OAuthToken,
    SourceType,
};

#[derive(Debug, Clone, FromRow)]
pub struct ConnectorRow {
    pub id: i64,
    pub name: String,
    pub source: String,
    pub config: serde_json::Value,
    pub refresh_freq: i64,
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub credential_id: Option<i64>,
    pub status: String,
    pub last_attempt_status: Option<String>,
    pub state: Option<serde_json::Value>,
    pub last_successful_index_date: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,
    pub disabled: bool,
    pub total_docs_indexed: i64,
    pub created_date: DateTime<Utc>,
}

impl TryFrom<ConnectorRow> for Connector {
    type Error = anyhow::Error;

    fn try_from(row: ConnectorRow) -> Result<Self> {
        let status = ConnectorStatus::from_str(&row.status)
            .ok_or_else(|| anyhow!("unknown connector status '{}'", row.status))?;
        let last_attempt_status = row
            .last_attempt_status
            .as_deref()
            .and_then(ConnectorStatus::from_str);

        Ok(Connector {
            id: row.id,
            name: row.name,
            source: SourceType::parse(&row.source),
            config: row.config,
            refresh_freq: row.refresh_freq,
            user_id: row.user_id,
            tenant_id: row.tenant_id,
            credential_id: row.credential_id,
            status,
            last_attempt_status,
            state: row.state.unwrap_or(serde_json::Value::Null),
            last_successful_index_date: row.last_successful_index_date,
            last_update: row.last_update,
            disabled: row.disabled,
            total_docs_indexed: row.total_docs_indexed,
            created_date: row.created_date,
            credential: None,
            docs: Vec::new(),
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DocumentRow {
    pub id: i64,
    pub connector_id: i64,
    pub source_id: String,
    pub url: String,
    pub original_url: Option<String>,
    pub signature: String,
    pub status: String,
    pub chunking_session: Option<Uuid>,
    pub created_date: DateTime<Utc>,
    pub updated_date: Option<DateTime<Utc>>,
    pub deleted_date: Option<DateTime<Utc>>,
}

impl From<DocumentRow> for Document {
    fn from(row: DocumentRow) -> Self {
        Document {
            id: Some(row.id),
            connector_id: row.connector_id,
            source_id: row.source_id,
            url: row.url,
            original_url: row.original_url,
            signature: row.signature,
            status: DocumentStatus::from_str(&row.status).unwrap_or(DocumentStatus::Pending),
            chunking_session: row.chunking_session,
            created_date: row.created_date,
            updated_date: row.updated_date,
            deleted_date: row.deleted_date,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CredentialRow {
    pub id: i64,
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub source: String,
    pub provider: String,
    pub token: Option<serde_json::Value>,
    pub custom: serde_json::Value,
    pub created_date: DateTime<Utc>,
    pub updated_date: Option<DateTime<Utc>>,
}

impl TryFrom<CredentialRow> for Credential {
    type Error = anyhow::Error;

    fn try_from(row: CredentialRow) -> Result<Self> {
        let provider = OAuthProvider::from_str(&row.provider)
            .ok_or_else(|| anyhow!("unknown oauth provider '{}'", row.provider))?;
        let token = match row.token {
            Some(value) if !value.is_null() => Some(serde_json::from_value::<OAuthToken>(value)?),
            _ => None,
        };

        Ok(Credential {
            id: row.id,
            user_id: row.user_id,
            tenant_id: row.tenant_id,
            source: row.source,
            provider,
            token,
            custom: row.custom,
            created_date: row.created_date,
            updated_date: row.updated_date,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector_row(status: &str) -> ConnectorRow {
        ConnectorRow {
            id: 1,
            name: "wiki".into(),
            source: "web".into(),
            config: serde_json::json!({"url": "https://example.com"}),
            refresh_freq: 3600,
            user_id: Uuid::new_v4(),
            tenant_id: None,
            credential_id: None,
            status: status.into(),
            last_attempt_status: Some("error".into()),
            state: None,
            last_successful_index_date: None,
            last_update: None,
            disabled: false,
            total_docs_indexed: 3,
            created_date: Utc::now(),
        }
    }

    #[test]
    fn test_connector_row_mapping() {
        let connector = Connector::try_from(connector_row("processing")).unwrap();
        assert_eq!(connector.status, ConnectorStatus::Processing);
        assert_eq!(connector.last_attempt_status, Some(ConnectorStatus::Error));
        assert_eq!(connector.source, SourceType::Web);
        assert!(connector.state.is_null());
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        assert!(Connector::try_from(connector_row("sleeping")).is_err());
    }

    #[test]
    fn test_credential_without_token() {
        let row = CredentialRow {
            id: 5,
            user_id: Uuid::new_v4(),
            tenant_id: None,
            source: "one-drive".into(),
            provider: "microsoft".into(),
            token: Some(serde_json::Value::Null),
            custom: serde_json::json!({}),
            created_date: Utc::now(),
            updated_date: None,
        };
        let credential = Credential::try_from(row).unwrap();
        assert_eq!(credential.provider, OAuthProvider::Microsoft);
        assert!(credential.token.is_none());
    }
}
