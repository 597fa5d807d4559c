use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use ingest_models::{blob_url, Connector as ConnectorModel, ConnectorRequest, FileType, SourceType};

use super::error::ConnectorError;
use super::traits::{Connector, TaskSink};
use super::types::{parse_config, ChangeItem, ConnectorBase, ConnectorEvent, EventSink, RunParams};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub mime_type: String,
}

/// Connector over a single file already uploaded to the connector's bucket
pub struct FileConnector {
    base: ConnectorBase,
    config: FileConfig,
}

impl FileConnector {
    pub fn new(model: &ConnectorModel) -> Result<Self, ConnectorError> {
        Ok(Self {
            base: ConnectorBase::from_model(model),
            config: parse_config(model)?,
        })
    }

    /// `minio:<bucket>:<file>`, used as both source id and url
    pub fn blob_reference(&self) -> String {
        blob_url(&self.base.bucket, &self.config.file_name)
    }
}

#[async_trait]
impl Connector for FileConnector {
    fn source_type(&self) -> SourceType {
        SourceType::File
    }

    fn validate(&self) -> Result<(), ConnectorError> {
        if self.config.file_name.is_empty() {
            return Err(ConnectorError::InvalidConfiguration("file_name is required".to_string()));
        }
        if self.config.mime_type.is_empty() {
            return Err(ConnectorError::InvalidConfiguration("mime_type is required".to_string()));
        }
        Ok(())
    }

    fn execute(self: Box<Self>, cancel: CancellationToken, _params: RunParams) -> mpsc::Receiver<ConnectorEvent> {
        let (sink, rx) = EventSink::channel(cancel);
        tokio::spawn(async move {
            let reference = self.blob_reference();
            let sent = match FileType::from_mime(&self.config.mime_type) {
                Some(file_type) if file_type != FileType::Unknown => {
                    info!("📄 Queuing file {} for chunking", self.config.file_name);
                    sink.changed(ChangeItem {
                        source_id: reference.clone(),
                        url: reference,
                        original_url: None,
                        name: self.config.file_name.clone(),
                        mime_type: self.config.mime_type.clone(),
                        file_type,
                        signature: String::new(),
                        content: None,
                        checkpoint: None,
                    })
                    .await
                }
                _ => {
                    error!(
                        "❌ Unsupported mime type {} for file {}",
                        self.config.mime_type, self.config.file_name
                    );
                    sink.seen(reference).await
                }
            };
            if let Err(e) = sent {
                if !matches!(e, ConnectorError::Cancelled) {
                    error!("❌ File connector {} failed: {}", self.base.connector_id, e);
                }
            }
        });
        rx
    }

    async fn prepare_task(&self, _session_id: Uuid, sink: &dyn TaskSink) -> Result<(), ConnectorError> {
        sink.run_connector(ConnectorRequest::new(self.base.connector_id)).await
    }
}
