//! Integration tests for the HTTP gateway binary.

use crate::helpers::{MockCluster, TestGateway};

#[tokio::test(flavor = "multi_thread")]
async fn put_then_get() {
    let cluster = MockCluster::start(3, false).await;
    let gateway = TestGateway::start(&cluster).await;

    let (status, body) = gateway.request("PUT", "/kv/greeting", "hello").await;
    assert_eq!(status, 204);
    assert!(body.is_empty());

    let (status, body) = gateway.request("GET", "/kv/greeting", "").await;
    assert_eq!(status, 200);
    assert_eq!(&body[..], b"hello");
    assert_eq!(cluster.served()[0], cluster.owner_of("greeting"));
}

#[tokio::test(flavor = "multi_thread")]
async fn post_is_accepted_for_writes() {
    let cluster = MockCluster::start(3, false).await;
    let gateway = TestGateway::start(&cluster).await;

    let (status, _) = gateway.request("POST", "/kv/user%3A%7B42%7D", "ada").await;
    assert_eq!(status, 204);
    let (status, body) = gateway.request("GET", "/kv/user:%7B42%7D", "").await;
    assert_eq!(status, 200);
    assert_eq!(&body[..], b"ada");
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_key_is_404() {
    let cluster = MockCluster::start(3, false).await;
    let gateway = TestGateway::start(&cluster).await;

    let (status, body) = gateway.get_json("/kv/missing").await;
    assert_eq!(status, 404);
    assert_eq!(body["error"], "NotFound");
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_routes_and_methods() {
    let cluster = MockCluster::start(1, false).await;
    let gateway = TestGateway::start(&cluster).await;

    assert_eq!(gateway.request("GET", "/nowhere", "").await.0, 404);
    assert_eq!(gateway.request("DELETE", "/kv/key", "").await.0, 405);
    assert_eq!(gateway.request("PUT", "/health", "").await.0, 405);
}

#[tokio::test(flavor = "multi_thread")]
async fn health_summarizes_the_view() {
    let cluster = MockCluster::start(3, true).await;
    let gateway = TestGateway::start(&cluster).await;

    let (status, body) = gateway.get_json("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["epoch"], 1);
    assert_eq!(body["node_count"], 6);
    assert_eq!(body["ranges"], 3);

    let nodes = body["nodes"].as_array().unwrap();
    let primaries = nodes.iter().filter(|n| n["role"] == "primary").count();
    assert_eq!(primaries, 3);
    assert!(nodes.iter().all(|n| n["liveness"] == "up"));
    let owned: u64 = nodes.iter().map(|n| n["slots"].as_u64().unwrap()).sum();
    assert_eq!(owned, 16384);
}

#[tokio::test(flavor = "multi_thread")]
async fn metrics_are_exported() {
    let cluster = MockCluster::start(1, false).await;
    let gateway = TestGateway::start(&cluster).await;

    gateway.request("PUT", "/kv/k", "v").await;
    let (status, body) = gateway.request("GET", "/metrics", "").await;
    assert_eq!(status, 200);
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("slotline_requests_total"), "got: {text}");
    assert!(text.contains("slotline_http_requests_total"), "got: {text}");
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_owner_is_503() {
    let cluster = MockCluster::start(3, false).await;
    let gateway = TestGateway::start(&cluster).await;

    cluster.set_down(cluster.owner_of("greeting"), true);
    let (status, body) = gateway.request("PUT", "/kv/greeting", "hello").await;
    assert_eq!(status, 503);

    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "NodeUnreachable");
    assert!(body["message"].as_str().unwrap().contains("unreachable"));
}

#[tokio::test(flavor = "multi_thread")]
async fn follows_resharding() {
    let cluster = MockCluster::start(3, false).await;
    let gateway = TestGateway::start(&cluster).await;

    cluster.insert("burst:0", "before");
    cluster.reassign(0, cluster.primary(2));

    let (status, body) = gateway.request("GET", "/kv/burst:0", "").await;
    assert_eq!(status, 200);
    assert_eq!(&body[..], b"before");

    let (_, health) = gateway.get_json("/health").await;
    assert_eq!(health["epoch"], 2);
}
