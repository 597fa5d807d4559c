//! Periodic scan that triggers due connectors.

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use ingest_models::messaging::PARAM_FILE_LIMIT;
use ingest_models::{Connector as ConnectorModel, ConnectorRequest, ConnectorStatus};

use super::EngineServices;
use crate::connectors::{self, ConnectorError, TaskSink};

pub struct Scheduler {
    services: EngineServices,
    interval: Duration,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(services: EngineServices, interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            services,
            interval,
            cancel,
        }
    }

    /// Scans every interval until cancelled
    pub async fn run(&self) {
        info!("⏰ Scheduler started, scanning every {:?}", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(0) => debug!("No connector due"),
                        Ok(count) => info!("⏰ Scheduled {} connector(s)", count),
                        Err(e) => error!("❌ Scheduler scan failed: {:#}", e),
                    }
                }
            }
        }
        info!("⏰ Scheduler stopped");
    }

    /// One scan over the active connectors; returns how many were scheduled
    pub async fn tick(&self) -> anyhow::Result<usize> {
        let now = Utc::now();
        let active = self
            .services
            .repos
            .connectors
            .list_active()
            .await
            .context("failed to list active connectors")?;

        let mut scheduled = 0;
        for model in active.into_iter().filter(|model| model.is_due(now)) {
            if self.cancel.is_cancelled() {
                break;
            }
            if self.schedule(model).await {
                scheduled += 1;
            }
        }
        Ok(scheduled)
    }

    async fn schedule(&self, mut model: ConnectorModel) -> bool {
        let repos = &self.services.repos;
        // built before the status changes so connectors see the previous outcome
        let built = connectors::build(&model, &self.services.context);

        model.status = ConnectorStatus::Pending;
        if let Err(e) = repos.connectors.update(&model).await {
            error!("❌ Could not mark connector {} as pending: {:#}", model.id, e);
            return false;
        }

        let session_id = Uuid::new_v4();
        let prepared = match built {
            Ok(connector) => {
                let sink = BrokerTaskSink::new(&self.services, model.clone());
                connector.prepare_task(session_id, &sink).await
            }
            Err(e) => Err(e),
        };

        match prepared {
            Ok(()) => true,
            Err(e) => {
                error!("❌ Could not schedule connector {}: {}", model.id, e);
                model.status = ConnectorStatus::Error;
                model.last_attempt_status = Some(ConnectorStatus::Error);
                model.last_update = Some(Utc::now());
                if let Err(e) = repos.connectors.update(&model).await {
                    error!("❌ Could not record failure of connector {}: {:#}", model.id, e);
                }
                false
            }
        }
    }
}

/// Receives `prepare_task` decisions and turns them into broker triggers
pub struct BrokerTaskSink<'a> {
    services: &'a EngineServices,
    model: ConnectorModel,
}

impl<'a> BrokerTaskSink<'a> {
    pub fn new(services: &'a EngineServices, model: ConnectorModel) -> Self {
        Self { services, model }
    }

    async fn set_status(&self, status: ConnectorStatus) -> Result<(), ConnectorError> {
        let mut model = self.model.clone();
        model.status = status;
        model.last_update = Some(Utc::now());
        self.services
            .repos
            .connectors
            .update(&model)
            .await
            .map_err(|e| ConnectorError::TaskFailed(format!("{:#}", e)))
    }
}

#[async_trait]
impl TaskSink for BrokerTaskSink<'_> {
    async fn run_connector(&self, mut request: ConnectorRequest) -> Result<(), ConnectorError> {
        request
            .params
            .entry(PARAM_FILE_LIMIT.to_string())
            .or_insert_with(|| self.services.context.default_file_limit.to_string());

        self.set_status(ConnectorStatus::Processing).await?;

        let topics = &self.services.topics;
        let payload = serde_json::to_vec(&request)?;
        self.services
            .broker
            .publish(&topics.connector_stream, &topics.executor_topic, payload)
            .await
            .map_err(|e| ConnectorError::TaskFailed(e.to_string()))?;
        info!("📤 Triggered connector {} [{}]", self.model.name, request.connector_id);
        Ok(())
    }

    async fn up_to_date(&self) -> Result<(), ConnectorError> {
        debug!("Connector {} is up to date", self.model.id);
        self.set_status(ConnectorStatus::Success).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::ConnectorContext;
    use crate::services::broker::InMemoryBroker;
    use crate::services::oauth::OAuthClient;
    use crate::services::storage::MemoryBlobStorage;
    use crate::services::vector::MemoryVectorIndex;
    use crate::services::Topics;
    use chrono::Duration as ChronoDuration;
    use ingest_config::{ApiEndpoints, GB};
    use ingest_database::{MemoryStore, Repositories};
    use ingest_models::messaging::PARAM_TEAM_ID;
    use ingest_models::SourceType;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn scheduler(store: &MemoryStore, broker: Arc<InMemoryBroker>) -> Scheduler {
        scheduler_at(store, broker, ApiEndpoints::default())
    }

    fn scheduler_at(store: &MemoryStore, broker: Arc<InMemoryBroker>, endpoints: ApiEndpoints) -> Scheduler {
        let http = reqwest::Client::new();
        let services = EngineServices {
            repos: Repositories::memory(store.clone()),
            broker,
            storage: Arc::new(MemoryBlobStorage::new()),
            vector: Arc::new(MemoryVectorIndex::new()),
            oauth: OAuthClient::new(http.clone(), "http://127.0.0.1:1"),
            context: ConnectorContext::new(http, endpoints, GB),
            topics: Topics::default(),
        };
        Scheduler::new(services, Duration::from_secs(60), CancellationToken::new())
    }

    fn triggers(broker: &InMemoryBroker) -> Vec<ConnectorRequest> {
        let topics = Topics::default();
        broker
            .pending(&topics.connector_stream, &topics.executor_topic)
            .iter()
            .map(|payload| serde_json::from_slice(payload).unwrap())
            .collect()
    }

    fn web(id: i64, url: &str) -> ConnectorModel {
        let mut model = ConnectorModel::new(id, "site", SourceType::Web, Uuid::new_v4());
        model.config = json!({"url": url});
        model
    }

    #[tokio::test]
    async fn test_due_connector_is_triggered_with_file_limit() {
        let store = MemoryStore::new();
        let broker = Arc::new(InMemoryBroker::default());
        store.insert_connector(web(1, "https://example.com")).await;

        let scheduled = scheduler(&store, broker.clone()).tick().await.unwrap();

        assert_eq!(scheduled, 1);
        let sent = triggers(&broker);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].connector_id, 1);
        assert_eq!(sent[0].params.get(PARAM_FILE_LIMIT), Some(&GB.to_string()));
        assert_eq!(store.connector(1).await.unwrap().status, ConnectorStatus::Processing);
    }

    #[tokio::test]
    async fn test_recent_or_busy_connectors_are_skipped() {
        let store = MemoryStore::new();
        let broker = Arc::new(InMemoryBroker::default());

        let mut fresh = web(1, "https://example.com");
        fresh.refresh_freq = 3600;
        fresh.last_successful_index_date = Some(Utc::now() - ChronoDuration::minutes(5));
        store.insert_connector(fresh).await;

        let mut busy = web(2, "https://example.com");
        busy.status = ConnectorStatus::Processing;
        store.insert_connector(busy).await;

        assert_eq!(scheduler(&store, broker.clone()).tick().await.unwrap(), 0);
        assert!(triggers(&broker).is_empty());
    }

    #[tokio::test]
    async fn test_processed_video_is_reported_up_to_date() {
        let store = MemoryStore::new();
        let broker = Arc::new(InMemoryBroker::default());
        let mut video = ConnectorModel::new(1, "talk", SourceType::Youtube, Uuid::new_v4());
        video.config = json!({"url": "https://www.youtube.com/watch?v=abc"});
        video.status = ConnectorStatus::Success;
        store.insert_connector(video).await;

        scheduler(&store, broker.clone()).tick().await.unwrap();

        assert!(triggers(&broker).is_empty());
        assert_eq!(store.connector(1).await.unwrap().status, ConnectorStatus::Success);
    }

    #[tokio::test]
    async fn test_invalid_connector_is_marked_error() {
        let store = MemoryStore::new();
        let broker = Arc::new(InMemoryBroker::default());
        store.insert_connector(web(1, "not a url")).await;

        assert_eq!(scheduler(&store, broker.clone()).tick().await.unwrap(), 0);
        assert!(triggers(&broker).is_empty());
        assert_eq!(store.connector(1).await.unwrap().status, ConnectorStatus::Error);
    }

    #[tokio::test]
    async fn test_expired_teams_token_still_triggers_a_run() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/teams"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let store = MemoryStore::new();
        let broker = Arc::new(InMemoryBroker::default());
        let mut teams = ConnectorModel::new(1, "teams", SourceType::MsTeams, Uuid::new_v4());
        teams.config = json!({
            "team": "Engineering",
            "token": {"access_token": "stale", "token_type": "Bearer", "refresh_token": "refresh"}
        });
        store.insert_connector(teams).await;
        let endpoints = ApiEndpoints {
            graph_url: server.uri(),
            google_drive_url: server.uri(),
        };

        let scheduled = scheduler_at(&store, broker.clone(), endpoints).tick().await.unwrap();

        assert_eq!(scheduled, 1);
        let sent = triggers(&broker);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].params.get(PARAM_TEAM_ID).is_none());
        assert_eq!(store.connector(1).await.unwrap().status, ConnectorStatus::Processing);
    }
}
