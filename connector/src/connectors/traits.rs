use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use ingest_models::{ConnectorRequest, SourceType};

use super::error::ConnectorError;
use super::types::{ConnectorEvent, RunParams};

/// Main trait that all connectors must implement
#[async_trait]
pub trait Connector: Send + Sync {
    fn source_type(&self) -> SourceType;

    /// Checks the configuration; called once by the factory, before any network call
    fn validate(&self) -> Result<(), ConnectorError>;

    /// Starts the run on a background task and returns the event stream.
    ///
    /// The stream closes when the source is exhausted or `cancel` fires.
    /// Stateful connectors send their final `State` event last.
    fn execute(self: Box<Self>, cancel: CancellationToken, params: RunParams) -> mpsc::Receiver<ConnectorEvent>;

    /// Schedule-time hook deciding whether and how a run is triggered
    async fn prepare_task(&self, session_id: Uuid, sink: &dyn TaskSink) -> Result<(), ConnectorError>;
}

/// Receiver of the decision made in `prepare_task`
#[async_trait]
pub trait TaskSink: Send + Sync {
    async fn run_connector(&self, request: ConnectorRequest) -> Result<(), ConnectorError>;

    /// The connector needs no run
    async fn up_to_date(&self) -> Result<(), ConnectorError>;
}
