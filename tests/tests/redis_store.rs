//! Session registry and event log against a real Redis.
//!
//! Requires Docker (or `SESSION_MESH_TEST_REDIS_URL`); run with
//! `cargo test -p integration-tests --test redis_store -- --ignored`.

use std::time::Duration;

use async_trait::async_trait;
use integration_tests::containers::TestRedis;
use mesh_core::{EventId, Result, TransportKind, TransportState};
use parking_lot::Mutex;
use session::{EventLog, EventSink, NodeIdentity, SessionConfig, SessionRegistry};
use shared_store::{SharedStoreRef, StoreConfig};
use tokio::sync::mpsc;

#[derive(Default)]
struct Collect(Mutex<Vec<String>>);

#[async_trait]
impl EventSink for Collect {
    async fn deliver(&self, _event_id: &EventId, payload: &str) -> Result<()> {
        self.0.lock().push(payload.to_string());
        Ok(())
    }
}

async fn connect(redis: &TestRedis) -> SharedStoreRef {
    let config = StoreConfig {
        url: redis.url.clone(),
        timeout_ms: 5000,
    };
    shared_store::connect(&config)
        .await
        .expect("Failed to connect to Redis")
}

/// Test append, replay and prune keep their ordering contract on Redis
#[tokio::test]
#[ignore = "requires Docker"]
async fn test_event_log_on_redis() {
    let redis = TestRedis::start().await;
    let log = EventLog::new(connect(&redis).await, Duration::from_secs(60));

    let e1 = log.append_at("s1", "m1", 100).await.unwrap();
    log.append_at("s1", "m2", 150).await.unwrap();
    log.append_at("s1", "m3", 200).await.unwrap();

    let sink = Collect::default();
    let stream = log.replay_after(e1.as_str(), &sink).await.unwrap();
    assert_eq!(stream.as_deref(), Some("s1"));
    assert_eq!(*sink.0.lock(), vec!["m2".to_string(), "m3".to_string()]);

    assert_eq!(log.prune("s1", 160).await.unwrap(), 2);
    let sink = Collect::default();
    assert!(log.replay_after(e1.as_str(), &sink).await.unwrap().is_none());
    assert!(sink.0.lock().is_empty());
}

/// Test a stream opened on one node resumes on another through Redis
#[tokio::test]
#[ignore = "requires Docker"]
async fn test_stream_restored_across_nodes_on_redis() {
    let redis = TestRedis::start().await;
    let store = connect(&redis).await;
    let config = SessionConfig::default();
    let node_a = SessionRegistry::new(store.clone(), NodeIdentity::new("node-a", true), &config);
    let node_b = SessionRegistry::new(store, NodeIdentity::new("node-b", true), &config);

    let handle = node_a
        .open_session(TransportState::event_stream())
        .await
        .unwrap();
    let sid = handle.session_id().to_string();
    let (tx, _rx) = mpsc::channel(8);
    handle.attach(tx);
    handle.send("m1".into()).await.unwrap();

    node_a
        .mark_disconnected_with_cursor(&sid, handle.last_event_id())
        .await
        .unwrap();
    let meta = node_b.lookup(&sid).await.unwrap().unwrap();
    assert_eq!(meta.kind(), TransportKind::EventStream);
    assert!(!meta.is_connected());

    let (tx, _rx) = mpsc::channel(8);
    let restored = node_b
        .restore_stream_handle(&sid, tx)
        .await
        .unwrap()
        .expect("Stream should be restorable");
    assert_eq!(restored.last_event_id(), handle.last_event_id());

    let meta = node_a.lookup(&sid).await.unwrap().unwrap();
    assert!(meta.is_connected());
    assert_eq!(meta.owner_node.as_deref(), Some("node-b"));

    node_b.remove(&sid).await.unwrap();
    assert!(!node_a.exists(&sid).await.unwrap());
}
