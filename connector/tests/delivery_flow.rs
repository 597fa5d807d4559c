// Trigger delivery through the in-memory broker: redelivery, dead-lettering
// and the scheduler feeding the executor

mod common;

use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{eventually, TestEngine};
use connector_engine::services::broker::{DeliveryPolicy, MessageBroker};
use connector_engine::services::{Delivery, Executor, MessageHandler, Scheduler};
use ingest_database::MemoryStore;
use ingest_models::{Connector, ConnectorRequest, ConnectorStatus, SourceType};

/// Records delivery counts and optionally heals the store on a given attempt
struct Recording {
    executor: Executor,
    store: MemoryStore,
    heal_on: Option<u64>,
    deliveries: Mutex<Vec<u64>>,
}

#[async_trait]
impl MessageHandler for Recording {
    async fn handle(&self, delivery: &Delivery) -> anyhow::Result<()> {
        self.deliveries.lock().unwrap().push(delivery.delivery_count);
        if self.heal_on == Some(delivery.delivery_count) {
            self.store.fail_connector_updates(false);
        }
        self.executor.handle(delivery).await
    }
}

fn fast_policy() -> DeliveryPolicy {
    DeliveryPolicy {
        max_deliver: 3,
        ack_wait: Duration::from_millis(20),
        block: Duration::from_millis(10),
        ..Default::default()
    }
}

fn site(id: i64) -> Connector {
    let mut model = Connector::new(id, "docs", SourceType::Web, Uuid::new_v4());
    model.config = json!({"url": "https://example.com/docs/"});
    model
}

async fn publish_trigger(engine: &TestEngine, connector_id: i64) {
    let topics = &engine.services.topics;
    let payload = serde_json::to_vec(&ConnectorRequest::new(connector_id)).unwrap();
    engine
        .broker
        .publish(&topics.connector_stream, &topics.executor_topic, payload)
        .await
        .unwrap();
}

fn spawn_listener(
    engine: &TestEngine,
    handler: Arc<dyn MessageHandler>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let broker = engine.broker.clone();
    let topics = engine.services.topics.clone();
    tokio::spawn(async move {
        broker
            .listen(cancel, &topics.connector_stream, &topics.executor_topic, handler)
            .await
            .unwrap();
    })
}

#[tokio::test]
async fn test_failing_finalize_is_redelivered_then_dead_lettered() {
    let engine = TestEngine::with_policy("http://127.0.0.1:1", fast_policy());
    engine.store.insert_connector(site(1)).await;
    engine.store.fail_connector_updates(true);

    let recording = Arc::new(Recording {
        executor: engine.executor(),
        store: engine.store.clone(),
        heal_on: None,
        deliveries: Mutex::new(Vec::new()),
    });
    let cancel = CancellationToken::new();
    let listener = spawn_listener(&engine, recording.clone(), cancel.clone());
    publish_trigger(&engine, 1).await;

    let topics = engine.services.topics.clone();
    let broker = engine.broker.clone();
    assert!(
        eventually(|| {
            let broker = broker.clone();
            let topics = topics.clone();
            async move { broker.dead_letters(&topics.connector_stream, &topics.executor_topic).len() == 1 }
        })
        .await
    );
    cancel.cancel();
    listener.await.unwrap();

    assert_eq!(*recording.deliveries.lock().unwrap(), vec![1, 2, 3]);
    assert!(engine.triggers().is_empty());
}

#[tokio::test]
async fn test_redelivery_completes_the_run() {
    let engine = TestEngine::with_policy("http://127.0.0.1:1", fast_policy());
    engine.store.insert_connector(site(2)).await;
    engine.store.fail_connector_updates(true);

    let recording = Arc::new(Recording {
        executor: engine.executor(),
        store: engine.store.clone(),
        heal_on: Some(2),
        deliveries: Mutex::new(Vec::new()),
    });
    let cancel = CancellationToken::new();
    let listener = spawn_listener(&engine, recording.clone(), cancel.clone());
    publish_trigger(&engine, 2).await;

    let store = engine.store.clone();
    assert!(
        eventually(|| {
            let store = store.clone();
            async move {
                store.connector(2).await.map(|c| c.status) == Some(ConnectorStatus::Success)
            }
        })
        .await
    );
    cancel.cancel();
    listener.await.unwrap();

    assert_eq!(*recording.deliveries.lock().unwrap(), vec![1, 2]);
    assert_eq!(engine.store.documents(2).await.len(), 1);
    assert_eq!(engine.chunking().len(), 1);
    let topics = &engine.services.topics;
    assert!(engine
        .broker
        .dead_letters(&topics.connector_stream, &topics.executor_topic)
        .is_empty());
}

#[tokio::test]
async fn test_scheduled_connector_is_run_by_the_executor() {
    let engine = TestEngine::with_policy("http://127.0.0.1:1", fast_policy());
    engine.store.insert_connector(site(3)).await;

    let cancel = CancellationToken::new();
    let executor = Arc::new(Executor::new(engine.services.clone(), cancel.clone()));
    let listener = tokio::spawn(async move { executor.listen().await });

    let scheduler = Scheduler::new(engine.services.clone(), Duration::from_secs(60), cancel.clone());
    assert_eq!(scheduler.tick().await.unwrap(), 1);

    let store = engine.store.clone();
    assert!(
        eventually(|| {
            let store = store.clone();
            async move {
                store.connector(3).await.map(|c| c.status) == Some(ConnectorStatus::Success)
            }
        })
        .await
    );
    assert_eq!(engine.chunking().len(), 1);

    // a fresh success is not due again
    assert_eq!(scheduler.tick().await.unwrap(), 0);

    cancel.cancel();
    listener.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_expired_teams_token_is_refreshed_by_the_scheduled_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/teams"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/teams"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{"id": "T1", "displayName": "Engineering"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/oauth/microsoft/refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"access_token": "fresh", "token_type": "Bearer", "refresh_token": "refresh"}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/teams/T1/channels"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
        .mount(&server)
        .await;

    let engine = TestEngine::with_policy(&server.uri(), fast_policy());
    let mut model = Connector::new(4, "teams", SourceType::MsTeams, Uuid::new_v4());
    model.config = json!({
        "team": "Engineering",
        "token": {"access_token": "stale", "token_type": "Bearer", "refresh_token": "refresh"}
    });
    engine.store.insert_connector(model).await;

    let scheduler = Scheduler::new(engine.services.clone(), Duration::from_secs(60), CancellationToken::new());
    assert_eq!(scheduler.tick().await.unwrap(), 1);
    let triggers = engine.triggers();
    assert_eq!(triggers.len(), 1);
    assert!(!triggers[0].params.contains_key("team_id"));
    assert_eq!(engine.store.connector(4).await.unwrap().status, ConnectorStatus::Processing);

    let cancel = CancellationToken::new();
    let executor = Arc::new(Executor::new(engine.services.clone(), cancel.clone()));
    let listener = tokio::spawn(async move { executor.listen().await });

    let store = engine.store.clone();
    assert!(
        eventually(|| {
            let store = store.clone();
            async move {
                store.connector(4).await.map(|c| c.status) == Some(ConnectorStatus::Success)
            }
        })
        .await
    );
    let stored = engine.store.connector(4).await.unwrap();
    assert_eq!(stored.config["token"]["access_token"], "fresh");

    cancel.cancel();
    listener.await.unwrap().unwrap();
}
