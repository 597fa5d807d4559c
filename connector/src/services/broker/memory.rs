//! In-process broker with the same delivery rules as the Redis one.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::{
    dead_letter_key, linked_token, stream_key, BrokerError, BrokerResult, Delivery, DeliveryPolicy, MessageBroker,
    MessageHandler,
};

/// Upper bound on how long an idle listener sleeps between checks
const IDLE_POLL: Duration = Duration::from_millis(250);

#[derive(Debug)]
struct Entry {
    id: String,
    payload: Vec<u8>,
    delivered: u64,
    /// Not deliverable before this instant; set while a delivery is in flight
    visible_at: Instant,
}

#[derive(Debug, Default)]
struct Queues {
    entries: HashMap<String, VecDeque<Entry>>,
    dead: HashMap<String, Vec<Delivery>>,
}

enum Next {
    Deliver(Delivery),
    Wait(Duration),
}

pub struct InMemoryBroker {
    policy: DeliveryPolicy,
    queues: Mutex<Queues>,
    notify: Notify,
    next_id: AtomicU64,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl InMemoryBroker {
    pub fn new(policy: DeliveryPolicy) -> Self {
        Self {
            policy,
            queues: Mutex::new(Queues::default()),
            notify: Notify::new(),
            next_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queues> {
        // a poisoned lock only means a listener panicked mid-update
        self.queues.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Messages that ran out of deliveries
    pub fn dead_letters(&self, stream: &str, topic: &str) -> Vec<Delivery> {
        let key = dead_letter_key(&stream_key(stream, topic));
        self.lock().dead.get(&key).cloned().unwrap_or_default()
    }

    /// Messages stored on a topic and not yet acknowledged
    pub fn pending(&self, stream: &str, topic: &str) -> Vec<Vec<u8>> {
        self.lock()
            .entries
            .get(&stream_key(stream, topic))
            .map(|queue| queue.iter().map(|entry| entry.payload.clone()).collect())
            .unwrap_or_default()
    }

    fn next(&self, key: &str) -> Next {
        let now = Instant::now();
        let mut queues = self.lock();
        let Queues { entries, dead } = &mut *queues;
        let Some(queue) = entries.get_mut(key) else {
            return Next::Wait(IDLE_POLL);
        };

        let mut wait = IDLE_POLL;
        let mut index = 0;
        while index < queue.len() {
            let entry = &mut queue[index];
            if entry.visible_at > now {
                wait = wait.min(entry.visible_at - now);
                index += 1;
                continue;
            }
            if entry.delivered >= self.policy.max_deliver {
                if let Some(entry) = queue.remove(index) {
                    error!(
                        "☠️ Message {} on {} dead-lettered after {} deliveries",
                        entry.id, key, entry.delivered
                    );
                    dead.entry(dead_letter_key(key)).or_default().push(Delivery {
                        id: entry.id,
                        payload: entry.payload,
                        delivery_count: entry.delivered,
                    });
                }
                continue;
            }
            entry.delivered += 1;
            entry.visible_at = now + self.policy.ack_wait;
            return Next::Deliver(Delivery {
                id: entry.id.clone(),
                payload: entry.payload.clone(),
                delivery_count: entry.delivered,
            });
        }
        Next::Wait(wait)
    }

    fn ack(&self, key: &str, id: &str) {
        if let Some(queue) = self.lock().entries.get_mut(key) {
            queue.retain(|entry| entry.id != id);
        }
    }

    async fn consume(&self, stop: CancellationToken, key: String, handler: Arc<dyn MessageHandler>) {
        info!("👂 Listening on {} (in-memory)", key);
        while !stop.is_cancelled() {
            match self.next(&key) {
                Next::Deliver(delivery) => match handler.handle(&delivery).await {
                    Ok(()) => self.ack(&key, &delivery.id),
                    Err(e) => warn!(
                        "⚠️ Handler failed for {} on {} (delivery {}): {}",
                        delivery.id, key, delivery.delivery_count, e
                    ),
                },
                Next::Wait(wait) => {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }
        info!("🛑 Stopped listening on {}", key);
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(DeliveryPolicy::default())
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, stream: &str, topic: &str, payload: Vec<u8>) -> BrokerResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(BrokerError::Closed);
        }
        let key = stream_key(stream, topic);
        let id = format!("{}-0", self.next_id.fetch_add(1, Ordering::SeqCst));
        {
            let mut queues = self.lock();
            let queue = queues.entries.entry(key.clone()).or_default();
            queue.push_back(Entry {
                id: id.clone(),
                payload,
                delivered: 0,
                visible_at: Instant::now(),
            });
            while queue.len() > self.policy.max_len.max(1) {
                queue.pop_front();
            }
        }
        debug!("Published {} to {}", id, key);
        self.notify.notify_waiters();
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
        self.tracker.track_future(self.consume(stop, key, handler)).await;
        Ok(())
    }

    async fn close(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Flaky {
        calls: AtomicUsize,
        fail_first: usize,
        seen: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl MessageHandler for Flaky {
        async fn handle(&self, delivery: &Delivery) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(delivery.delivery_count);
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                anyhow::bail!("boom");
            }
            Ok(())
        }
    }

    fn policy() -> DeliveryPolicy {
        DeliveryPolicy {
            ack_wait: Duration::from_millis(20),
            ..DeliveryPolicy::default()
        }
    }

    fn flaky(fail_first: usize) -> Arc<Flaky> {
        Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            fail_first,
            seen: Mutex::new(Vec::new()),
        })
    }

    async fn run_for(broker: &Arc<InMemoryBroker>, handler: Arc<Flaky>, millis: u64) {
        let cancel = CancellationToken::new();
        let listener = {
            let broker = broker.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { broker.listen(cancel, "connector", "executor", handler).await })
        };
        tokio::time::sleep(Duration::from_millis(millis)).await;
        cancel.cancel();
        listener.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_ack_removes_message() {
        let broker = Arc::new(InMemoryBroker::new(policy()));
        broker.publish("connector", "executor", b"{}".to_vec()).await.unwrap();
        let handler = flaky(0);

        run_for(&broker, handler.clone(), 100).await;

        assert_eq!(*handler.seen.lock().unwrap(), vec![1]);
        assert!(broker.pending("connector", "executor").is_empty());
    }

    #[tokio::test]
    async fn test_failed_message_is_redelivered() {
        let broker = Arc::new(InMemoryBroker::new(policy()));
        broker.publish("connector", "executor", b"{}".to_vec()).await.unwrap();
        let handler = flaky(1);

        run_for(&broker, handler.clone(), 200).await;

        assert_eq!(*handler.seen.lock().unwrap(), vec![1, 2]);
        assert!(broker.dead_letters("connector", "executor").is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_message_is_dead_lettered() {
        let broker = Arc::new(InMemoryBroker::new(policy()));
        broker.publish("connector", "executor", b"poison".to_vec()).await.unwrap();
        let handler = flaky(usize::MAX);

        run_for(&broker, handler.clone(), 300).await;

        assert_eq!(*handler.seen.lock().unwrap(), vec![1, 2, 3]);
        let dead = broker.dead_letters("connector", "executor");
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].payload, b"poison".to_vec());
        assert!(broker.pending("connector", "executor").is_empty());
    }

    #[tokio::test]
    async fn test_close_stops_listeners_and_rejects_publish() {
        let broker = Arc::new(InMemoryBroker::default());
        let listener = {
            let broker = broker.clone();
            tokio::spawn(async move {
                broker
                    .listen(CancellationToken::new(), "connector", "executor", flaky(0))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.close().await;

        listener.await.unwrap().unwrap();
        assert!(matches!(
            broker.publish("connector", "executor", Vec::new()).await,
            Err(BrokerError::Closed)
        ));
    }
}
