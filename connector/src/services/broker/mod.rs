//! Durable work-queue messaging between the scheduler, the executor and
//! the chunking stage.

pub mod memory;
pub mod redis_stream;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use ingest_config::BrokerConfig;

pub use memory::InMemoryBroker;
pub use redis_stream::RedisStreamBroker;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Broker is closed")]
    Closed,

    #[error("Malformed message {id}: {reason}")]
    Malformed { id: String, reason: String },
}

pub type BrokerResult<T> = Result<T, BrokerError>;

/// One delivery of a stored message
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub id: String,
    pub payload: Vec<u8>,
    /// 1 on first delivery
    pub delivery_count: u64,
}

/// Consumer callback. The delivery is acknowledged only when it returns `Ok`.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: &Delivery) -> anyhow::Result<()>;
}

#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Appends a message, creating the stream on first use
    async fn publish(&self, stream: &str, topic: &str, payload: Vec<u8>) -> BrokerResult<()>;

    /// Consumes the topic until `cancel` fires or the broker is closed
    async fn listen(
        &self,
        cancel: CancellationToken,
        stream: &str,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> BrokerResult<()>;

    /// Stops every listener and waits for in-flight handlers to finish
    async fn close(&self);
}

/// Storage key of a topic within a stream
pub fn stream_key(stream: &str, topic: &str) -> String {
    format!("{}:{}", stream, topic)
}

pub fn dead_letter_key(key: &str) -> String {
    format!("{}.dead-letter", key)
}

/// Redelivery and batching rules shared by every broker implementation
#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    pub consumer_group: String,
    pub max_deliver: u64,
    pub ack_wait: Duration,
    pub batch_size: usize,
    pub block: Duration,
    pub max_len: usize,
}

impl DeliveryPolicy {
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            consumer_group: config.consumer_group.clone(),
            max_deliver: u64::from(config.max_deliver.max(1)),
            ack_wait: config.ack_wait(),
            batch_size: config.batch_size.max(1),
            block: Duration::from_millis(config.block_ms as u64),
            max_len: config.max_len,
        }
    }
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            consumer_group: "executor-subscription".to_string(),
            max_deliver: 3,
            ack_wait: Duration::from_secs(60),
            batch_size: 10,
            block: Duration::from_secs(2),
            max_len: 100_000,
        }
    }
}

/// Builds the broker selected by the configured URL
pub async fn connect(config: &BrokerConfig) -> BrokerResult<Arc<dyn MessageBroker>> {
    let policy = DeliveryPolicy::from_config(config);
    if config.is_memory() {
        tracing::info!("📨 Using in-memory message broker");
        return Ok(Arc::new(InMemoryBroker::new(policy)));
    }
    let broker = RedisStreamBroker::connect(&config.url, policy).await?;
    Ok(Arc::new(broker))
}

/// Cancelled when either `external` fires or `shutdown` is cancelled
pub(crate) fn linked_token(shutdown: &CancellationToken, external: CancellationToken) -> CancellationToken {
    let stop = shutdown.child_token();
    let forward = stop.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = external.cancelled() => forward.cancel(),
            _ = forward.cancelled() => {}
        }
    });
    stop
}
