//! Cross-node routing tests: forwarding, restoration and the typed
//! failures a client sees when neither is possible.
//!
//! Nodes share one in-memory store. Owner nodes that must answer forwarded
//! requests are served on a real local socket.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum_test::TestServer;
use integration_tests::{
    fixtures,
    mocks::FailingResolver,
    setup::{serve, TestContext},
};
use mesh_core::{SessionMetadata, TransportState};
use serde_json::json;
use session::{NodeIdentity, SessionRegistry};
use tokio::sync::mpsc;

const SESSION_HEADER: &str = "mcp-session-id";
const FORWARDED_BY: &str = "x-session-mesh-forwarded-by";

async fn open_streamable(registry: &SessionRegistry) -> String {
    registry
        .open_session(TransportState::streamable(None))
        .await
        .unwrap()
        .session_id()
        .to_string()
}

async fn wait_until_disconnected(registry: &SessionRegistry, sid: &str) -> SessionMetadata {
    for _ in 0..200 {
        let meta = registry.lookup(sid).await.unwrap().unwrap();
        if !meta.is_connected() {
            return meta;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session {} never marked disconnected", sid);
}

/// Reads an SSE body until `needle` shows up.
async fn read_until(response: &mut reqwest::Response, needle: &str) -> String {
    let mut seen = String::new();
    let read = async {
        while let Some(chunk) = response.chunk().await.expect("Stream read failed") {
            seen.push_str(&String::from_utf8_lossy(&chunk));
            if seen.contains(needle) {
                return;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), read)
        .await
        .unwrap_or_else(|_| panic!("never saw {:?} in stream", needle));
    seen
}

/// Test a request for a session owned elsewhere is proxied to the owner
#[tokio::test]
async fn test_request_forwarded_to_owner() {
    let ctx = TestContext::new();
    let node_b = ctx.node("node-b");
    let url_b = serve(node_b.router.clone()).await;
    let node_a = ctx.node_with_peers("node-a", &[("node-b", url_b.as_str())]);
    let server = TestServer::new(node_a.router.clone()).expect("Failed to create test server");

    let session_id = open_streamable(node_b.registry()).await;

    let response = server
        .post("/mcp")
        .add_header(SESSION_HEADER, session_id.as_str())
        .json(&fixtures::request(9, "echo", json!({"via": "node-a"})))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["id"], 9);
    assert_eq!(body["result"]["echo"]["via"], "node-a");

    // Served by the owner, not restored here
    assert!(node_a.registry().get_local_handle(&session_id).is_none());
    assert!(node_b.registry().get_local_handle(&session_id).is_some());
}

/// Test DELETE reaches the owner, which releases its handle
#[tokio::test]
async fn test_delete_forwarded_to_owner() {
    let ctx = TestContext::new();
    let node_b = ctx.node("node-b");
    let url_b = serve(node_b.router.clone()).await;
    let node_a = ctx.node_with_peers("node-a", &[("node-b", url_b.as_str())]);
    let server = TestServer::new(node_a.router.clone()).expect("Failed to create test server");

    let session_id = open_streamable(node_b.registry()).await;

    let response = server
        .delete("/mcp")
        .add_header(SESSION_HEADER, session_id.as_str())
        .await;

    response.assert_status(StatusCode::NO_CONTENT);
    assert!(node_b.registry().get_local_handle(&session_id).is_none());
    assert!(!node_a.registry().exists(&session_id).await.unwrap());
}

/// Test an event-stream message lands on the owner's live stream
#[tokio::test]
async fn test_event_stream_message_forwarded_to_owner() {
    let ctx = TestContext::new();
    let node_b = ctx.node("node-b");
    let url_b = serve(node_b.router.clone()).await;
    let node_a = ctx.node_with_peers("node-a", &[("node-b", url_b.as_str())]);
    let server = TestServer::new(node_a.router.clone()).expect("Failed to create test server");

    let handle = node_b
        .registry()
        .open_session(TransportState::event_stream())
        .await
        .unwrap();
    let (tx, mut rx) = mpsc::channel(8);
    handle.attach(tx);

    let response = server
        .post(&format!("/messages?sessionId={}", handle.session_id()))
        .json(&fixtures::request(3, "echo", json!({"x": 1})))
        .await;
    response.assert_status(StatusCode::ACCEPTED);

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("Reply never reached the owner's stream")
        .expect("Stream closed");
    let reply: serde_json::Value = serde_json::from_str(&event.data).unwrap();
    assert_eq!(reply["id"], 3);
}

/// Test an unreachable owner surfaces as FORWARD_001
#[tokio::test]
async fn test_unreachable_owner_returns_502() {
    let ctx = TestContext::new();
    let node_b = ctx.node("node-b");
    let node_a = ctx.node_with_peers("node-a", &[("node-b", "http://127.0.0.1:1")]);
    let server = TestServer::new(node_a.router.clone()).expect("Failed to create test server");

    let session_id = open_streamable(node_b.registry()).await;

    let response = server
        .post("/mcp")
        .add_header(SESSION_HEADER, session_id.as_str())
        .json(&fixtures::request(1, "ping", json!({})))
        .await;

    response.assert_status(StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "FORWARD_001");
}

/// Test an owner missing from discovery surfaces as FORWARD_002
#[tokio::test]
async fn test_unknown_owner_address_returns_502() {
    let ctx = TestContext::new();
    let node_b = ctx.node("node-b");
    let node_a = ctx.node("node-a");
    let server = TestServer::new(node_a.router.clone()).expect("Failed to create test server");

    let session_id = open_streamable(node_b.registry()).await;

    let response = server
        .post("/mcp")
        .add_header(SESSION_HEADER, session_id.as_str())
        .json(&fixtures::request(1, "ping", json!({})))
        .await;

    response.assert_status(StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "FORWARD_002");
}

/// Test a request that was already forwarded once is never forwarded again
#[tokio::test]
async fn test_forwarding_loop_returns_508() {
    let ctx = TestContext::new();
    let node_b = ctx.node("node-b");
    let node_a = ctx.node_with_peers("node-a", &[("node-b", "http://127.0.0.1:1")]);
    let server = TestServer::new(node_a.router.clone()).expect("Failed to create test server");

    let session_id = open_streamable(node_b.registry()).await;

    let response = server
        .post("/mcp")
        .add_header(SESSION_HEADER, session_id.as_str())
        .add_header(FORWARDED_BY, "node-c")
        .json(&fixtures::request(1, "ping", json!({})))
        .await;

    response.assert_status(StatusCode::LOOP_DETECTED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "FORWARD_003");
}

/// Test a failing discovery backend is a transient store failure
#[tokio::test]
async fn test_resolver_failure_returns_503() {
    let ctx = TestContext::new();
    let node_b = ctx.node("node-b");
    let node_a = ctx.node_with(
        NodeIdentity::new("node-a", true),
        Arc::new(FailingResolver),
        Arc::new(api::EchoHandler),
    );
    let server = TestServer::new(node_a.router.clone()).expect("Failed to create test server");

    let session_id = open_streamable(node_b.registry()).await;

    let response = server
        .post("/mcp")
        .add_header(SESSION_HEADER, session_id.as_str())
        .json(&fixtures::request(1, "ping", json!({})))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "STORE_001");
}

/// Test a streamable session without an owner must be re-established
#[tokio::test]
async fn test_stateless_fleet_requires_reestablish() {
    let ctx = TestContext::new();
    let node_b = ctx.stateless_node("node-b");
    let node_a = ctx.stateless_node("node-a");
    let server = TestServer::new(node_a.router.clone()).expect("Failed to create test server");

    let session_id = open_streamable(node_b.registry()).await;
    let meta = node_a.registry().lookup(&session_id).await.unwrap().unwrap();
    assert!(meta.owner_node.is_none());

    let response = server
        .post("/mcp")
        .add_header(SESSION_HEADER, session_id.as_str())
        .json(&fixtures::request(1, "ping", json!({})))
        .await;

    response.assert_status(StatusCode::GONE);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "SESSION_003");
}

/// Test the wrong endpoint for a session's transport is rejected
#[tokio::test]
async fn test_transport_mismatch_returns_400() {
    let ctx = TestContext::new();
    let node_a = ctx.node("node-a");
    let server = TestServer::new(node_a.router.clone()).expect("Failed to create test server");

    let handle = node_a
        .registry()
        .open_session(TransportState::event_stream())
        .await
        .unwrap();

    let response = server
        .post("/mcp")
        .add_header(SESSION_HEADER, handle.session_id())
        .json(&fixtures::request(1, "ping", json!({})))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "SESSION_002");
}

/// Test sessions nobody registered are not found on any endpoint
#[tokio::test]
async fn test_unknown_session_returns_404() {
    let ctx = TestContext::new();
    let node_a = ctx.node("node-a");
    let server = TestServer::new(node_a.router.clone()).expect("Failed to create test server");
    let session_id = fixtures::unknown_session_id();

    let response = server
        .post("/mcp")
        .add_header(SESSION_HEADER, session_id.as_str())
        .json(&fixtures::request(1, "ping", json!({})))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);

    let response = server
        .post(&format!("/messages?sessionId={}", session_id))
        .json(&fixtures::request(1, "ping", json!({})))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "SESSION_001");
}

/// Test opening an event stream announces where to post messages
#[tokio::test]
async fn test_event_stream_open_announces_endpoint() {
    let ctx = TestContext::new();
    let node_a = ctx.node("node-a");
    let url_a = serve(node_a.router.clone()).await;

    let mut response = reqwest::get(format!("{}/sse", url_a)).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let seen = read_until(&mut response, "\n\n").await;
    assert!(seen.contains("event: endpoint"));
    assert!(seen.contains("/messages?sessionId="));

    let ids = node_a.registry().local_stream_ids();
    assert_eq!(ids.len(), 1);
    assert!(seen.contains(&ids[0]));
}

/// Test a dropped event stream resumes on another node from its stored
/// cursor, receiving what it missed and nothing it already had
#[tokio::test]
async fn test_event_stream_restored_on_another_node() {
    let ctx = TestContext::new();
    let node_b = ctx.node("node-b");
    let node_a = ctx.node("node-a");
    let url_a = serve(node_a.router.clone()).await;

    let handle = node_b
        .registry()
        .open_session(TransportState::event_stream())
        .await
        .unwrap();
    let sid = handle.session_id().to_string();

    let (tx, mut rx) = mpsc::channel(8);
    handle.attach(tx.clone());
    handle.send("m1".into()).await.unwrap();
    assert_eq!(rx.recv().await.unwrap().data, "m1");

    // Client drops off; m2 is only in the log
    handle.detach(&tx);
    tokio::time::sleep(Duration::from_millis(5)).await;
    handle.send("m2".into()).await.unwrap();
    handle.close().unwrap();

    let meta = wait_until_disconnected(node_b.registry(), &sid).await;
    assert!(meta.last_event_id().is_some());

    let mut response = reqwest::get(format!("{}/sse?sessionId={}", url_a, sid))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let seen = read_until(&mut response, "data: m2").await;
    assert!(!seen.contains("data: m1"));

    let meta = node_a.registry().lookup(&sid).await.unwrap().unwrap();
    assert!(meta.is_connected());
    assert_eq!(meta.owner_node.as_deref(), Some("node-a"));
    assert!(node_a.registry().get_local_handle(&sid).is_some());
}

/// Test an explicit Last-Event-ID wins over the stored cursor
#[tokio::test]
async fn test_event_stream_resumes_from_last_event_id() {
    let ctx = TestContext::new();
    let node_b = ctx.node("node-b");
    let node_a = ctx.node("node-a");
    let url_a = serve(node_a.router.clone()).await;

    let handle = node_b
        .registry()
        .open_session(TransportState::event_stream())
        .await
        .unwrap();
    let sid = handle.session_id().to_string();

    let (tx, _rx) = mpsc::channel(8);
    handle.attach(tx);
    let first = handle.send("m1".into()).await.unwrap();
    // Distinct timestamps keep replay ordering unambiguous
    tokio::time::sleep(Duration::from_millis(5)).await;
    handle.send("m2".into()).await.unwrap();
    handle.close().unwrap();
    wait_until_disconnected(node_b.registry(), &sid).await;

    // The client only saw m1
    let client = reqwest::Client::new();
    let mut response = client
        .get(format!("{}/sse?sessionId={}", url_a, sid))
        .header("Last-Event-ID", first.as_str())
        .send()
        .await
        .unwrap();

    let seen = read_until(&mut response, "data: m2").await;
    assert!(!seen.contains("data: m1"));
}
