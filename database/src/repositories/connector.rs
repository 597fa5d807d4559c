use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::{query, query_as, PgPool};

use ingest_models::{Connector, Credential, Document};

use super::ConnectorRepository;
use crate::models::{ConnectorRow, CredentialRow, DocumentRow};

const CONNECTOR_COLUMNS: &str = r#"
    id, name, source, config, refresh_freq, user_id, tenant_id, credential_id,
    status, last_attempt_status, state, last_successful_index_date, last_update,
    disabled, total_docs_indexed, created_date
"#;

pub struct PgConnectorRepository {
    pool: PgPool,
}

impl PgConnectorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_credential(&self, credential_id: i64) -> Result<Option<Credential>> {
        let row = query_as::<_, CredentialRow>(
            r#"
            SELECT id, user_id, tenant_id, source, provider, token, custom, created_date, updated_date
            FROM credentials
            WHERE id = $1
            "#,
        )
        .bind(credential_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load credential")?;

        row.map(Credential::try_from).transpose()
    }

    async fn load_documents(&self, connector_id: i64) -> Result<Vec<Document>> {
        let rows = query_as::<_, DocumentRow>(
            r#"
            SELECT id, connector_id, source_id, url, original_url, signature, status,
                   chunking_session, created_date, updated_date, deleted_date
            FROM documents
            WHERE connector_id = $1 AND deleted_date IS NULL
            "#,
        )
        .bind(connector_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load connector documents")?;

        Ok(rows.into_iter().map(Document::from).collect())
    }
}

#[async_trait]
impl ConnectorRepository for PgConnectorRepository {
    async fn get_by_id(&self, id: i64) -> Result<Option<Connector>> {
        let sql = format!(
            "SELECT {} FROM connectors WHERE id = $1 AND deleted_date IS NULL",
            CONNECTOR_COLUMNS
        );
        let row = query_as::<_, ConnectorRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load connector")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut connector = Connector::try_from(row)?;
        if let Some(credential_id) = connector.credential_id {
            connector.credential = self.load_credential(credential_id).await?;
        }
        connector.docs = self.load_documents(connector.id).await?;

        Ok(Some(connector))
    }

    async fn update(&self, connector: &Connector) -> Result<()> {
        let result = query(
            r#"
            UPDATE connectors SET
                config = $2,
                status = $3,
                last_attempt_status = $4,
                state = $5,
                last_successful_index_date = $6,
                last_update = $7,
                disabled = $8,
                total_docs_indexed = $9
            WHERE id = $1
            "#,
        )
        .bind(connector.id)
        .bind(&connector.config)
        .bind(connector.status.as_str())
        .bind(connector.last_attempt_status.map(|s| s.as_str()))
        .bind(&connector.state)
        .bind(connector.last_successful_index_date)
        .bind(connector.last_update)
        .bind(connector.disabled)
        .bind(connector.total_docs_indexed)
        .execute(&self.pool)
        .await
        .context("Failed to update connector")?;

        if result.rows_affected() == 0 {
            bail!("connector {} not found", connector.id);
        }
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<Connector>> {
        let sql = format!(
            "SELECT {} FROM connectors WHERE deleted_date IS NULL AND disabled = FALSE ORDER BY id",
            CONNECTOR_COLUMNS
        );
        let rows = query_as::<_, ConnectorRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list active connectors")?;

        let mut connectors = Vec::with_capacity(rows.len());
        for row in rows {
            let mut connector = Connector::try_from(row)?;
            if let Some(credential_id) = connector.credential_id {
                connector.credential = self.load_credential(credential_id).await?;
            }
            connectors.push(connector);
        }
        Ok(connectors)
    }
}
