pub mod broker;
pub mod executor;
pub mod oauth;
pub mod scheduler;
pub mod storage;
pub mod vector;

pub use broker::{Delivery, MessageBroker, MessageHandler};
pub use executor::{Executor, ExecutorError};
pub use oauth::OAuthClient;
pub use scheduler::{BrokerTaskSink, Scheduler};
pub use storage::BlobStorage;
pub use vector::VectorIndex;

use std::sync::Arc;

use ingest_config::BrokerConfig;
use ingest_database::Repositories;

use crate::connectors::ConnectorContext;

/// Stream and topic names the engine publishes to and consumes from
#[derive(Debug, Clone)]
pub struct Topics {
    pub connector_stream: String,
    pub executor_topic: String,
    pub chunking_stream: String,
    pub chunking_topic: String,
}

impl Topics {
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            connector_stream: config.connector_stream.clone(),
            executor_topic: config.executor_topic.clone(),
            chunking_stream: config.chunking_stream.clone(),
            chunking_topic: config.chunking_topic.clone(),
        }
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            connector_stream: "connector".to_string(),
            executor_topic: "executor".to_string(),
            chunking_stream: "chunking".to_string(),
            chunking_topic: "chunking".to_string(),
        }
    }
}

/// Everything the executor and the scheduler talk to
#[derive(Clone)]
pub struct EngineServices {
    pub repos: Repositories,
    pub broker: Arc<dyn MessageBroker>,
    pub storage: Arc<dyn BlobStorage>,
    pub vector: Arc<dyn VectorIndex>,
    pub oauth: OAuthClient,
    pub context: ConnectorContext,
    pub topics: Topics,
}
