use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::{query, PgPool};

use ingest_models::Credential;

use super::CredentialRepository;

pub struct PgCredentialRepository {
    pool: PgPool,
}

impl PgCredentialRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialRepository for PgCredentialRepository {
    async fn update(&self, credential: &Credential) -> Result<()> {
        let token = credential
            .token
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .context("Failed to serialize token")?;

        let result = query(
            r#"
            UPDATE credentials SET token = $2, custom = $3, updated_date = NOW()
            WHERE id = $1
            "#,
        )
        .bind(credential.id)
        .bind(token)
        .bind(&credential.custom)
        .execute(&self.pool)
        .await
        .context("Failed to update credential")?;

        if result.rows_affected() == 0 {
            bail!("credential {} not found", credential.id);
        }
        Ok(())
    }
}
