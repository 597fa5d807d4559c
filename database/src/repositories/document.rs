use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::{query, query_scalar, PgPool};

use ingest_models::Document;

use super::DocumentRepository;

pub struct PgDocumentRepository {
    pool: PgPool,
}

impl PgDocumentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentRepository for PgDocumentRepository {
    async fn create(&self, document: &mut Document) -> Result<()> {
        let id: i64 = query_scalar(
            r#"
            INSERT INTO documents (connector_id, source_id, url, original_url, signature, status, chunking_session, created_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(document.connector_id)
        .bind(&document.source_id)
        .bind(&document.url)
        .bind(&document.original_url)
        .bind(&document.signature)
        .bind(document.status.as_str())
        .bind(document.chunking_session)
        .bind(document.created_date)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create document")?;

        document.id = Some(id);
        Ok(())
    }

    async fn update(&self, document: &Document) -> Result<()> {
        let id = document
            .id
            .ok_or_else(|| anyhow!("document {} has no id", document.source_id))?;

        query(
            r#"
            UPDATE documents SET
                url = $2,
                original_url = $3,
                signature = $4,
                status = $5,
                chunking_session = $6,
                updated_date = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&document.url)
        .bind(&document.original_url)
        .bind(&document.signature)
        .bind(document.status.as_str())
        .bind(document.chunking_session)
        .execute(&self.pool)
        .await
        .context("Failed to update document")?;

        Ok(())
    }

    async fn archive_by_ids(&self, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = query(
            "UPDATE documents SET deleted_date = NOW() WHERE id = ANY($1) AND deleted_date IS NULL",
        )
        .bind(ids.to_vec())
        .execute(&self.pool)
        .await
        .context("Failed to archive documents")?;

        Ok(result.rows_affected())
    }
}
