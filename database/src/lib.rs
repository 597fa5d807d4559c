// Persistence layer for the connector engine
// Repository contracts with a Postgres implementation and an in-memory one

pub mod memory;
pub mod models;
pub mod repositories;

pub use memory::MemoryStore;
pub use repositories::{
    ConnectorRepository, CredentialRepository, DocumentRepository, Repositories,
};

pub use ingest_config::DatabaseConfig;
pub use sqlx;

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

/// Database connection manager
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .connect(&config.database_url)
            .await
            .context("Failed to connect to database")?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;
        Ok(())
    }

    pub fn repositories(&self) -> Repositories {
        Repositories::postgres(self.pool.clone())
    }
}
