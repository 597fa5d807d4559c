//! Redis Streams broker. Each `stream:topic` pair is one Redis stream
//! consumed through a consumer group; acknowledged entries are deleted so
//! the stream behaves as a work queue.

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{
    StreamClaimReply, StreamId, StreamMaxlen, StreamPendingCountReply, StreamReadOptions, StreamReadReply,
};
use redis::{AsyncCommands, Client};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    dead_letter_key, linked_token, stream_key, BrokerError, BrokerResult, Delivery, DeliveryPolicy, MessageBroker,
    MessageHandler,
};

const PAYLOAD_FIELD: &str = "payload";

pub struct RedisStreamBroker {
    client: Client,
    conn: ConnectionManager,
    policy: DeliveryPolicy,
    consumer: String,
    groups: Mutex<HashSet<String>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl RedisStreamBroker {
    pub async fn connect(url: &str, policy: DeliveryPolicy) -> BrokerResult<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        info!("✅ Connected to Redis streams broker");
        Ok(Self {
            client,
            conn,
            policy,
            consumer: format!("consumer-{}", Uuid::new_v4().simple()),
            groups: Mutex::new(HashSet::new()),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    /// Creates the consumer group once; an existing group is fine
    async fn ensure_group(&self, key: &str) -> BrokerResult<()> {
        let mut groups = self.groups.lock().await;
        if groups.contains(key) {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let created: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(key, &self.policy.consumer_group, "0")
            .await;
        match created {
            Ok(()) => info!("📨 Created consumer group {} on {}", self.policy.consumer_group, key),
            Err(e) if e.code() == Some("BUSYGROUP") => {}
            Err(e) => return Err(e.into()),
        }
        groups.insert(key.to_string());
        Ok(())
    }

    async fn consume(
        &self,
        stop: CancellationToken,
        key: String,
        handler: Arc<dyn MessageHandler>,
    ) -> BrokerResult<()> {
        self.ensure_group(&key).await?;
        // blocking reads get their own connection so publishers are not stalled
        let mut reader = self.client.get_multiplexed_async_connection().await?;
        let options = StreamReadOptions::default()
            .group(&self.policy.consumer_group, &self.consumer)
            .count(self.policy.batch_size)
            .block(self.policy.block.as_millis() as usize);
        info!("👂 Listening on {} as {}", key, self.consumer);

        while !stop.is_cancelled() {
            if let Err(e) = self.reclaim(&key, handler.as_ref()).await {
                error!("❌ Failed to reclaim pending messages on {}: {}", key, e);
            }

            let read: redis::RedisResult<Option<StreamReadReply>> = tokio::select! {
                _ = stop.cancelled() => break,
                read = read_new(&mut reader, &key, &options) => read,
            };
            match read {
                Ok(Some(reply)) => {
                    for stream in reply.keys {
                        for entry in stream.ids {
                            self.dispatch(&key, &entry, 1, handler.as_ref()).await;
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!("❌ Failed to read from {}: {}", key, e);
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }
        info!("🛑 Stopped listening on {}", key);
        Ok(())
    }

    /// Claims deliveries whose ack deadline passed. Entries that already
    /// used up their deliveries go to the dead-letter stream instead.
    async fn reclaim(&self, key: &str, handler: &dyn MessageHandler) -> BrokerResult<()> {
        let mut conn = self.conn.clone();
        let pending: StreamPendingCountReply = conn
            .xpending_count(key, &self.policy.consumer_group, "-", "+", self.policy.batch_size)
            .await?;
        let ack_wait_ms = self.policy.ack_wait.as_millis() as usize;

        for item in pending.ids {
            if item.last_delivered_ms < ack_wait_ms {
                continue;
            }
            let claimed: StreamClaimReply = conn
                .xclaim(key, &self.policy.consumer_group, &self.consumer, ack_wait_ms, &[&item.id])
                .await?;
            let Some(entry) = claimed.ids.into_iter().next() else {
                continue;
            };
            let delivered = item.times_delivered as u64;
            if delivered >= self.policy.max_deliver {
                self.dead_letter(key, &entry, delivered).await?;
            } else {
                debug!("Redelivering {} on {} (attempt {})", entry.id, key, delivered + 1);
                self.dispatch(key, &entry, delivered + 1, handler).await;
            }
        }
        Ok(())
    }

    async fn dispatch(&self, key: &str, entry: &StreamId, delivery_count: u64, handler: &dyn MessageHandler) {
        let Some(payload) = entry.get::<Vec<u8>>(PAYLOAD_FIELD) else {
            warn!("⚠️ Dropping entry {} on {} without payload", entry.id, key);
            if let Err(e) = self.dead_letter(key, entry, delivery_count).await {
                error!("❌ Failed to dead-letter {}: {}", entry.id, e);
            }
            return;
        };
        let delivery = Delivery {
            id: entry.id.clone(),
            payload,
            delivery_count,
        };
        match handler.handle(&delivery).await {
            Ok(()) => {
                if let Err(e) = self.ack(key, &entry.id).await {
                    error!("❌ Failed to ack {} on {}: {}", entry.id, key, e);
                }
            }
            Err(e) => warn!(
                "⚠️ Handler failed for {} on {} (delivery {}): {}",
                entry.id, key, delivery_count, e
            ),
        }
    }

    async fn ack(&self, key: &str, id: &str) -> BrokerResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.xack(key, &self.policy.consumer_group, &[id]).await?;
        let _: i64 = conn.xdel(key, &[id]).await?;
        Ok(())
    }

    async fn dead_letter(&self, key: &str, entry: &StreamId, delivered: u64) -> BrokerResult<()> {
        let payload = entry.get::<Vec<u8>>(PAYLOAD_FIELD).unwrap_or_default();
        let target = dead_letter_key(key);
        let mut conn = self.conn.clone();
        let fields: [(&str, Vec<u8>); 3] = [
            (PAYLOAD_FIELD, payload),
            ("source_id", entry.id.clone().into_bytes()),
            ("delivery_count", delivered.to_string().into_bytes()),
        ];
        let _: String = conn
            .xadd_maxlen(&target, StreamMaxlen::Approx(self.policy.max_len), "*", &fields)
            .await?;
        self.ack(key, &entry.id).await?;
        error!(
            "☠️ Message {} on {} moved to {} after {} deliveries",
            entry.id, key, target, delivered
        );
        Ok(())
    }
}

async fn read_new(
    reader: &mut MultiplexedConnection,
    key: &str,
    options: &StreamReadOptions,
) -> redis::RedisResult<Option<StreamReadReply>> {
    reader.xread_options(&[key], &[">"], options).await
}

#[async_trait]
impl MessageBroker for RedisStreamBroker {
    async fn publish(&self, stream: &str, topic: &str, payload: Vec<u8>) -> BrokerResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(BrokerError::Closed);
        }
        let key = stream_key(stream, topic);
        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd_maxlen(&key, StreamMaxlen::Approx(self.policy.max_len), "*", &[(PAYLOAD_FIELD, payload)])
            .await?;
        debug!("Published {} to {}", id, key);
        Ok(())
    }

    async fn listen(
        &self,
        cancel: CancellationToken,
        stream: &str,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> BrokerResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(BrokerError::Closed);
        }
        let stop = linked_token(&self.shutdown, cancel);
        let key = stream_key(stream, topic);
        self.tracker.track_future(self.consume(stop, key, handler)).await
    }

    async fn close(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("🔌 Redis streams broker closed");
    }
}
