use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use ingest_models::{
    Connector as ConnectorModel, ConnectorRequest, DriveSyncState, OAuthToken, SourceType, SyncState,
};

use super::drive::{DriveEntry, DriveOptions, DriveSource, DriveWalker};
use super::error::ConnectorError;
use super::factory::ConnectorContext;
use super::microsoft::{DriveItem, GraphClient};
use super::traits::{Connector, TaskSink};
use super::types::{parse_config, ConnectorBase, ConnectorEvent, EventSink, RunParams};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OneDriveConfig {
    #[serde(default)]
    pub folder: String,
    #[serde(default)]
    pub recursive: bool,
}

pub struct OneDriveConnector {
    base: ConnectorBase,
    config: OneDriveConfig,
    token: Option<OAuthToken>,
    state: DriveSyncState,
    context: ConnectorContext,
}

impl OneDriveConnector {
    pub fn new(model: &ConnectorModel, context: &ConnectorContext) -> Result<Self, ConnectorError> {
        let config: OneDriveConfig = parse_config(model)?;
        let state = match SyncState::decode(&model.source, &model.state)? {
            SyncState::Drive(state) => state,
            _ => DriveSyncState::default(),
        };
        Ok(Self {
            base: ConnectorBase::from_model(model),
            config,
            token: model.oauth_token(),
            state,
            context: context.clone(),
        })
    }

    fn graph(&self) -> GraphClient {
        let authorization = self.token.as_ref().map(|t| t.authorization()).unwrap_or_default();
        GraphClient::new(self.context.http.clone(), &self.context.endpoints.graph_url, authorization)
    }
}

struct OneDriveSource {
    graph: GraphClient,
}

#[async_trait]
impl DriveSource for OneDriveSource {
    async fn list_root(&self) -> Result<Vec<DriveEntry>, ConnectorError> {
        let items: Vec<DriveItem> = self.graph.get_all("/me/drive/root/children").await?;
        Ok(items.into_iter().filter_map(DriveItem::into_entry).collect())
    }

    async fn list_folder(&self, folder_id: &str) -> Result<Vec<DriveEntry>, ConnectorError> {
        let path = format!("/me/drive/items/{}/children", folder_id);
        let items: Vec<DriveItem> = self.graph.get_all(&path).await?;
        Ok(items.into_iter().filter_map(DriveItem::into_entry).collect())
    }
}

#[async_trait]
impl Connector for OneDriveConnector {
    fn source_type(&self) -> SourceType {
        SourceType::OneDrive
    }

    fn validate(&self) -> Result<(), ConnectorError> {
        match &self.token {
            Some(token) if token.is_complete() => Ok(()),
            Some(_) => Err(ConnectorError::InvalidConfiguration("wrong token".to_string())),
            None => Err(ConnectorError::InvalidConfiguration("missing token".to_string())),
        }
    }

    fn execute(self: Box<Self>, cancel: CancellationToken, params: RunParams) -> mpsc::Receiver<ConnectorEvent> {
        let (sink, rx) = EventSink::channel(cancel);
        let options = DriveOptions {
            folder: self.config.folder.trim_matches('/').to_string(),
            recursive: self.config.recursive,
            file_size_limit: params.file_limit(self.context.default_file_limit),
        };

        tokio::spawn(async move {
            let source = OneDriveSource { graph: self.graph() };
            let mut walker = DriveWalker::new(options, self.base.clone());
            let mut state = self.state.clone();

            match walker.walk(&source, &sink).await {
                Ok(()) => {
                    state.last_scan_at = Some(Utc::now());
                    info!("📁 OneDrive scan finished for connector {}", self.base.connector_id);
                }
                Err(ConnectorError::Cancelled) => return,
                Err(e) => {
                    error!("❌ OneDrive scan failed for connector {}: {}", self.base.connector_id, e);
                    let _ = sink.failed(e).await;
                }
            }
            let _ = sink.emit(ConnectorEvent::State(SyncState::Drive(state))).await;
        });
        rx
    }

    async fn prepare_task(&self, _session_id: Uuid, sink: &dyn TaskSink) -> Result<(), ConnectorError> {
        sink.run_connector(ConnectorRequest::new(self.base.connector_id)).await
    }
}
