//! Tests for health check endpoints.
//!
//! Health is process-wide, so only one test here changes it.

use axum::http::StatusCode;
use axum_test::TestServer;
use integration_tests::setup::TestContext;
use mesh_core::TransportState;
use worker::StoreProbeWorker;

/// Test /health endpoint returns proper structure
#[tokio::test]
async fn test_health_endpoint_structure() {
    let ctx = TestContext::new();
    let node = ctx.node("node-a");
    let server = TestServer::new(node.router.clone()).expect("Failed to create test server");

    let response = server.get("/health").await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert!(body.get("status").is_some(), "Response should have 'status' field");
    assert!(
        body.get("store_connected").is_some(),
        "Response should have 'store_connected' field"
    );
    assert_eq!(body["node_id"], "node-a");
    assert_eq!(body["local_sessions"], 0);
}

/// Test /health counts the sessions this node holds
#[tokio::test]
async fn test_health_reports_local_sessions() {
    let ctx = TestContext::new();
    let node_a = ctx.node("node-a");
    let node_b = ctx.node("node-b");
    let server = TestServer::new(node_a.router.clone()).expect("Failed to create test server");

    node_a
        .registry()
        .open_session(TransportState::event_stream())
        .await
        .unwrap();
    node_a
        .registry()
        .open_session(TransportState::streamable(None))
        .await
        .unwrap();
    node_b
        .registry()
        .open_session(TransportState::streamable(None))
        .await
        .unwrap();

    let body: serde_json::Value = server.get("/health").await.json();
    assert_eq!(body["local_sessions"], 2);
}

/// Test readiness follows the store probe
#[tokio::test]
async fn test_ready_endpoint_follows_store_probe() {
    let ctx = TestContext::new();
    let node = ctx.node("node-a");
    let server = TestServer::new(node.router.clone()).expect("Failed to create test server");
    let probe = StoreProbeWorker::new(ctx.store.clone());

    ctx.store.set_unavailable(true);
    assert!(!probe.run().await);
    server
        .get("/health/ready")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = server.get("/health").await.json();
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["store_connected"], false);

    ctx.store.set_unavailable(false);
    assert!(probe.run().await);
    server.get("/health/ready").await.assert_status_ok();
    let body: serde_json::Value = server.get("/health").await.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store_connected"], true);
}

/// Test /health/live endpoint always returns 200 when service is running
#[tokio::test]
async fn test_live_endpoint() {
    let ctx = TestContext::new();
    let node = ctx.node("node-a");
    let server = TestServer::new(node.router.clone()).expect("Failed to create test server");

    server.get("/health/live").await.assert_status_ok();
}

/// Test an unavailable store surfaces as STORE_001 at the request boundary
#[tokio::test]
async fn test_store_outage_returns_503() {
    let ctx = TestContext::new();
    let node = ctx.node("node-a");
    let server = TestServer::new(node.router.clone()).expect("Failed to create test server");

    ctx.store.set_unavailable(true);
    let response = server
        .post("/mcp")
        .json(&integration_tests::fixtures::initialize_request(1))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "STORE_001");
}
