use anyhow::Context;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use connector_engine::connectors::ConnectorContext;
use connector_engine::services::broker;
use connector_engine::services::storage::S3BlobStorage;
use connector_engine::services::vector::QdrantVectorIndex;
use connector_engine::services::{EngineServices, Executor, OAuthClient, Scheduler, Topics};
use ingest_config::EngineConfig;
use ingest_database::Database;
use ingest_observability::init_tracing_for;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = EngineConfig::from_env();
    init_tracing_for(&config.service_name);

    info!("🚀 [Connector Engine] Starting {}", config.service_name);

    let database = Database::new(&config.database).await?;
    database.migrate().await?;
    info!("🗄️  Database connected and migrated");

    let context = ConnectorContext::from_config(&config).context("failed to build HTTP client")?;
    let broker = broker::connect(&config.broker)
        .await
        .context("failed to connect to the message broker")?;
    let storage = S3BlobStorage::new(context.http.clone(), &config.storage)
        .context("failed to configure blob storage")?;
    let vector = QdrantVectorIndex::new(context.http.clone(), &config.vector);
    let oauth = OAuthClient::new(context.http.clone(), &config.oauth.url);

    let services = EngineServices {
        repos: database.repositories(),
        broker: broker.clone(),
        storage: Arc::new(storage),
        vector: Arc::new(vector),
        oauth,
        context,
        topics: Topics::from_config(&config.broker),
    };

    let shutdown = CancellationToken::new();
    let executor = Arc::new(Executor::new(services.clone(), shutdown.clone()));
    let listener = tokio::spawn(executor.listen());

    let scheduler = if config.scheduler.enabled {
        let scheduler = Scheduler::new(services, config.scheduler.interval(), shutdown.clone());
        Some(tokio::spawn(async move { scheduler.run().await }))
    } else {
        warn!("⚠️  Scheduler disabled; runs are only triggered by external messages");
        None
    };

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("🛑 Shutdown requested");
    shutdown.cancel();

    broker.close().await;
    match listener.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("❌ Executor listener stopped with error: {}", e),
        Err(e) => error!("❌ Executor listener task failed: {}", e),
    }
    if let Some(scheduler) = scheduler {
        if let Err(e) = scheduler.await {
            error!("❌ Scheduler task failed: {}", e);
        }
    }

    info!("👋 Connector engine stopped");
    Ok(())
}
