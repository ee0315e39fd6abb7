//! WebSocket client runs against the axum echo routes.

mod harness;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use harness::TestServer;
use parking_lot::Mutex;
use rsload::{Body, Config, RequestOutcome, ResponseView};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_echo_completes_every_request() {
    harness::init_tracing();
    let (server, addr) = TestServer::spawn().await;

    let config = Config::new(format!("ws://{}/ws", addr))
        .with_concurrency(4)
        .with_max_requests(100)
        .with_body(Body::Json(serde_json::json!({"hello": "world"})))
        .with_quiet(true);
    let result = rsload::run(config).await.unwrap();

    assert_eq!(result.total_requests, 100);
    assert_eq!(result.total_errors, 0, "errors: {:?}", result.error_codes);
    assert!(server.ws_messages() >= 100);

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unmatched_messages_are_skipped() {
    let (server, addr) = TestServer::spawn().await;

    let ids = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&ids);
    let config = Config::new(format!("ws://{}/ws/noisy", addr))
        .with_concurrency(2)
        .with_max_requests(20)
        .with_status_callback(Arc::new(move |outcome: &RequestOutcome| {
            assert!(outcome.is_success(), "{:?}", outcome);
            assert_eq!(outcome.status, None);
            sink.lock().push(outcome.id);
        }))
        .with_quiet(true);
    let result = rsload::run(config).await.unwrap();

    assert_eq!(result.total_requests, 20);
    assert_eq!(result.total_errors, 0);
    let ids = ids.lock();
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 20);

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_inspector_sees_echoed_envelope() {
    let (server, addr) = TestServer::spawn().await;

    let config = Config::new(format!("ws://{}/ws", addr))
        .with_max_requests(5)
        .with_body(Body::Text("payload-IDX".into()))
        .with_index_param("IDX")
        .with_content_inspector(Arc::new(|view: &ResponseView<'_>| {
            let reply: serde_json::Value = serde_json::from_slice(view.body).ok()?;
            let body = reply["body"].as_str()?;
            (!body.starts_with("payload-") || body.contains("IDX")).then(|| "bad-echo".to_string())
        }))
        .with_quiet(true);
    let result = rsload::run(config).await.unwrap();

    assert_eq!(result.total_requests, 5);
    assert_eq!(result.total_errors, 0, "errors: {:?}", result.error_codes);

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unreachable_target_records_transport_errors() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = Config::new(format!("ws://{}/ws", addr))
        .with_max_requests(3)
        .with_max_seconds(Duration::from_secs(5))
        .with_quiet(true);
    let result = rsload::run(config).await.unwrap();
    assert_eq!(result.total_requests, 3);
    assert_eq!(result.error_codes.get("-1"), Some(&3));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_http_route_fails_handshake() {
    let (server, addr) = TestServer::spawn().await;

    // `/` is a plain HTTP route, so the upgrade is refused.
    let config = Config::new(format!("ws://{}/", addr))
        .with_max_requests(2)
        .with_quiet(true);
    let result = rsload::run(config).await.unwrap();
    assert_eq!(result.total_errors, 2);

    server.shutdown().await;
}
