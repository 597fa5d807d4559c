use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use url::Url;
use uuid::Uuid;

use ingest_models::file_type::MIME_URL;
use ingest_models::{Connector as ConnectorModel, ConnectorRequest, ConnectorStatus, FileType, SourceType};

use super::error::ConnectorError;
use super::traits::{Connector, TaskSink};
use super::types::{parse_config, ChangeItem, ConnectorBase, ConnectorEvent, EventSink, RunParams};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct YoutubeConfig {
    #[serde(default)]
    pub url: String,
}

/// Single video whose transcript is produced downstream
pub struct YoutubeConnector {
    base: ConnectorBase,
    config: YoutubeConfig,
}

impl YoutubeConnector {
    pub fn new(model: &ConnectorModel) -> Result<Self, ConnectorError> {
        Ok(Self {
            base: ConnectorBase::from_model(model),
            config: parse_config(model)?,
        })
    }

    /// A video that was processed once, successfully or not, is left alone
    fn is_settled(&self) -> bool {
        matches!(self.base.status, ConnectorStatus::Success | ConnectorStatus::Error)
    }
}

#[async_trait]
impl Connector for YoutubeConnector {
    fn source_type(&self) -> SourceType {
        SourceType::Youtube
    }

    fn validate(&self) -> Result<(), ConnectorError> {
        if self.config.url.is_empty() {
            return Err(ConnectorError::InvalidConfiguration("url is required".to_string()));
        }
        Url::parse(&self.config.url)
            .map(|_| ())
            .map_err(|e| ConnectorError::InvalidConfiguration(format!("invalid url '{}': {}", self.config.url, e)))
    }

    fn execute(self: Box<Self>, cancel: CancellationToken, _params: RunParams) -> mpsc::Receiver<ConnectorEvent> {
        let (sink, rx) = EventSink::channel(cancel);
        tokio::spawn(async move {
            let url = self.config.url.clone();
            let sent = if self.is_settled() {
                debug!("Video {} already processed", url);
                sink.seen(url).await
            } else {
                sink.changed(ChangeItem {
                    source_id: url.clone(),
                    url: url.clone(),
                    original_url: Some(url.clone()),
                    name: url,
                    mime_type: MIME_URL.to_string(),
                    file_type: FileType::Yt,
                    signature: String::new(),
                    content: None,
                    checkpoint: None,
                })
                .await
            };
            if let Err(e) = sent {
                if !matches!(e, ConnectorError::Cancelled) {
                    error!("❌ YouTube connector {} failed: {}", self.base.connector_id, e);
                }
            }
        });
        rx
    }

    async fn prepare_task(&self, _session_id: Uuid, sink: &dyn TaskSink) -> Result<(), ConnectorError> {
        if self.is_settled() {
            return sink.up_to_date().await;
        }
        sink.run_connector(ConnectorRequest::new(self.base.connector_id)).await
    }
}
