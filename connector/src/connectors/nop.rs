use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use ingest_models::{Connector as ConnectorModel, SourceType};

use super::error::ConnectorError;
use super::traits::{Connector, TaskSink};
use super::types::{ConnectorEvent, EventSink, RunParams};

/// Stand-in for source types without a fetcher. Its stream is empty.
pub struct NopConnector {
    source: SourceType,
}

impl NopConnector {
    pub fn new(model: &ConnectorModel) -> Self {
        Self {
            source: model.source.clone(),
        }
    }
}

#[async_trait]
impl Connector for NopConnector {
    fn source_type(&self) -> SourceType {
        self.source.clone()
    }

    fn validate(&self) -> Result<(), ConnectorError> {
        Ok(())
    }

    fn execute(self: Box<Self>, cancel: CancellationToken, _params: RunParams) -> mpsc::Receiver<ConnectorEvent> {
        debug!("No fetcher for source type {}", self.source);
        let (_sink, rx) = EventSink::channel(cancel);
        rx
    }

    async fn prepare_task(&self, _session_id: Uuid, sink: &dyn TaskSink) -> Result<(), ConnectorError> {
        sink.up_to_date().await
    }
}
