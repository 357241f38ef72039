//! Session lifecycle tests on a single node.
//!
//! Runs the real router over the in-memory store; no Docker needed.

use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use integration_tests::{fixtures, mocks::RecordingHandler, setup::TestContext};
use mesh_core::keys::session_key;
use mesh_core::{TransportKind, TransportState};
use serde_json::json;
use session::{NodeIdentity, StaticOwnerResolver};
use shared_store::SharedStore;
use tokio::sync::mpsc;

const SESSION_HEADER: &str = "mcp-session-id";

async fn open_session(server: &TestServer) -> String {
    let response = server
        .post("/mcp")
        .json(&fixtures::initialize_request(1))
        .await;
    response.assert_status_ok();
    response
        .header(SESSION_HEADER)
        .to_str()
        .expect("Session header is not ASCII")
        .to_string()
}

/// Test initialize opens a session and answers with server info
#[tokio::test]
async fn test_initialize_opens_session() {
    let ctx = TestContext::new();
    let node = ctx.node("node-a");
    let server = TestServer::new(node.router.clone()).expect("Failed to create test server");

    let response = server
        .post("/mcp")
        .json(&fixtures::initialize_request(1))
        .await;
    response.assert_status_ok();

    let session_id = response.header(SESSION_HEADER).to_str().unwrap().to_string();
    let body: serde_json::Value = response.json();
    assert_eq!(body["id"], 1);
    assert_eq!(body["result"]["protocolVersion"], fixtures::PROTOCOL_VERSION);
    assert_eq!(body["result"]["serverInfo"]["name"], "session-mesh");

    let meta = node
        .registry()
        .lookup(&session_id)
        .await
        .unwrap()
        .expect("Session record should exist");
    assert_eq!(meta.kind(), TransportKind::Streamable);
    assert_eq!(meta.owner_node.as_deref(), Some("node-a"));
    assert_eq!(
        meta.transport
            .request_state()
            .and_then(|s| s.protocol_version.as_deref()),
        Some(fixtures::PROTOCOL_VERSION)
    );
    assert!(node.registry().get_local_handle(&session_id).is_some());
}

/// Test requests on an open session are served by the handler
#[tokio::test]
async fn test_request_on_open_session() {
    let ctx = TestContext::new();
    let node = ctx.node("node-a");
    let server = TestServer::new(node.router.clone()).expect("Failed to create test server");
    let session_id = open_session(&server).await;

    let response = server
        .post("/mcp")
        .add_header(SESSION_HEADER, session_id.as_str())
        .json(&fixtures::request(2, "tools/call", json!({"name": "lookup"})))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["id"], 2);
    assert_eq!(body["result"]["echo"]["name"], "lookup");
}

/// Test notifications are accepted without a reply
#[tokio::test]
async fn test_notification_returns_202() {
    let ctx = TestContext::new();
    let node = ctx.node("node-a");
    let server = TestServer::new(node.router.clone()).expect("Failed to create test server");
    let session_id = open_session(&server).await;

    let response = server
        .post("/mcp")
        .add_header(SESSION_HEADER, session_id.as_str())
        .json(&fixtures::notification("notifications/initialized"))
        .await;

    response.assert_status(StatusCode::ACCEPTED);
}

/// Test a batch yields the replies of its requests only
#[tokio::test]
async fn test_batch_request() {
    let ctx = TestContext::new();
    let node = ctx.node("node-a");
    let server = TestServer::new(node.router.clone()).expect("Failed to create test server");
    let session_id = open_session(&server).await;

    let batch = json!([
        fixtures::request(10, "ping", json!({})),
        fixtures::notification("notifications/progress"),
        fixtures::request(11, "echo", json!({"n": 1})),
    ]);
    let response = server
        .post("/mcp")
        .add_header(SESSION_HEADER, session_id.as_str())
        .json(&batch)
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let replies = body.as_array().expect("Batch reply should be an array");
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0]["id"], 10);
    assert_eq!(replies[1]["result"]["echo"]["n"], 1);
}

/// Test server-initiated messages are persisted for listener replay
#[tokio::test]
async fn test_server_initiated_message_is_logged() {
    let ctx = TestContext::new();
    let node = ctx.node("node-a");
    let server = TestServer::new(node.router.clone()).expect("Failed to create test server");
    let session_id = open_session(&server).await;

    let response = server
        .post("/mcp")
        .add_header(SESSION_HEADER, session_id.as_str())
        .json(&fixtures::request(3, "notify", json!({"level": "info"})))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let event_id = body["result"]["eventId"].as_str().unwrap();
    assert!(event_id.starts_with(&format!("{}_", session_id)));
}

/// Test DELETE terminates the session; later requests are not found
#[tokio::test]
async fn test_delete_terminates_session() {
    let ctx = TestContext::new();
    let node = ctx.node("node-a");
    let server = TestServer::new(node.router.clone()).expect("Failed to create test server");
    let session_id = open_session(&server).await;

    let response = server
        .delete("/mcp")
        .add_header(SESSION_HEADER, session_id.as_str())
        .await;
    response.assert_status(StatusCode::NO_CONTENT);

    assert!(!node.registry().exists(&session_id).await.unwrap());
    assert!(node.registry().get_local_handle(&session_id).is_none());

    let response = server
        .post("/mcp")
        .add_header(SESSION_HEADER, session_id.as_str())
        .json(&fixtures::request(4, "ping", json!({})))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "SESSION_001");
}

/// Test a request that neither names nor opens a session is malformed
#[tokio::test]
async fn test_missing_session_id_returns_400() {
    let ctx = TestContext::new();
    let node = ctx.node("node-a");
    let server = TestServer::new(node.router.clone()).expect("Failed to create test server");

    let response = server
        .post("/mcp")
        .json(&fixtures::request(1, "tools/list", json!({})))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "VALID_001");
}

/// Test an unparseable body without a session is malformed
#[tokio::test]
async fn test_invalid_json_returns_400() {
    let ctx = TestContext::new();
    let node = ctx.node("node-a");
    let server = TestServer::new(node.router.clone()).expect("Failed to create test server");

    let response = server
        .post("/mcp")
        .text("{not json")
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "VALID_001");
}

/// Test a header with characters no session id can carry is rejected
#[tokio::test]
async fn test_invalid_session_header_returns_400() {
    let ctx = TestContext::new();
    let node = ctx.node("node-a");
    let server = TestServer::new(node.router.clone()).expect("Failed to create test server");

    let response = server
        .post("/mcp")
        .add_header(SESSION_HEADER, "bad id with spaces")
        .json(&fixtures::request(1, "ping", json!({})))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "VALID_001");
}

/// Test an expired record wins over a lingering local handle
#[tokio::test]
async fn test_local_handle_without_record_is_not_found() {
    let ctx = TestContext::new();
    let node = ctx.node("node-a");
    let server = TestServer::new(node.router.clone()).expect("Failed to create test server");
    let session_id = open_session(&server).await;

    // Simulate TTL expiry behind the node's back
    ctx.store.del(&[session_key(&session_id)]).await.unwrap();

    let response = server
        .post("/mcp")
        .add_header(SESSION_HEADER, session_id.as_str())
        .json(&fixtures::request(5, "ping", json!({})))
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
    assert!(node.registry().get_local_handle(&session_id).is_none());
}

/// Test event-stream messages are answered over the stream
#[tokio::test]
async fn test_event_stream_message_reply_goes_over_stream() {
    let ctx = TestContext::new();
    let node = ctx.node("node-a");
    let server = TestServer::new(node.router.clone()).expect("Failed to create test server");

    let handle = node
        .registry()
        .open_session(TransportState::event_stream())
        .await
        .unwrap();
    let (tx, mut rx) = mpsc::channel(8);
    handle.attach(tx);

    let response = server
        .post(&format!("/messages?sessionId={}", handle.session_id()))
        .json(&fixtures::request(7, "echo", json!({"hello": "world"})))
        .await;
    response.assert_status(StatusCode::ACCEPTED);

    let event = rx.recv().await.expect("Reply should arrive on the stream");
    let reply: serde_json::Value = serde_json::from_str(&event.data).unwrap();
    assert_eq!(reply["id"], 7);
    assert_eq!(reply["result"]["echo"]["hello"], "world");
    assert_eq!(event.id, handle.last_event_id());
}

/// Test the message endpoint requires a session id
#[tokio::test]
async fn test_messages_without_session_id_returns_400() {
    let ctx = TestContext::new();
    let node = ctx.node("node-a");
    let server = TestServer::new(node.router.clone()).expect("Failed to create test server");

    let response = server
        .post("/messages")
        .json(&fixtures::request(1, "ping", json!({})))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

/// Test a custom handler sees every message, under the right session
#[tokio::test]
async fn test_custom_message_handler() {
    let ctx = TestContext::new();
    let handler = RecordingHandler::new();
    let node = ctx.node_with(
        NodeIdentity::new("node-a", true),
        Arc::new(StaticOwnerResolver::default()),
        Arc::new(handler.clone()),
    );
    let server = TestServer::new(node.router.clone()).expect("Failed to create test server");

    let session_id = open_session(&server).await;
    let response = server
        .post("/mcp")
        .add_header(SESSION_HEADER, session_id.as_str())
        .json(&fixtures::request(2, "anything", json!({})))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["result"]["servedBy"], session_id.as_str());

    let seen = handler.seen();
    assert_eq!(handler.count(), 2);
    assert!(seen.iter().all(|(sid, _)| sid == &session_id));
    assert_eq!(seen[0].1["method"], "initialize");
}
