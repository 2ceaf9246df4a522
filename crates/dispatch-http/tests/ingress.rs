use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dispatch_core::Registry;
use dispatch_http::{router, IngressState};
use serde_json::json;
use tokio::net::TcpListener;

async fn spawn_server() -> (SocketAddr, Arc<Registry>) {
    let specs = vec![dispatch_core::WorkerSpec {
        name: "worker-a".into(),
        model: "demo-model".into(),
        token: "secret-token".into(),
        max_concurrency: 1,
    }];
    let (registry, _handles) = Registry::build(specs, Duration::from_secs(30));
    let app = router(IngressState { registry: registry.clone() });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, registry)
}

#[tokio::test]
async fn unknown_model_returns_404() {
    let (addr, _registry) = spawn_server().await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/v1/chat/completions"))
        .json(&json!({ "model": "no-such-model", "messages": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn happy_path_streams_fragments_from_the_worker() {
    let (addr, registry) = spawn_server().await;
    let worker = registry.workers_by_token.get("secret-token").unwrap().clone();
    worker.mark_session_started();

    // Stands in for the worker-transport session: accepts the dispatched
    // task off the inbox and drives its lifecycle directly.
    let serving = {
        let worker = worker.clone();
        tokio::spawn(async move {
            let mut inbox_rx = worker.inbox_rx.lock().await;
            let task = inbox_rx.recv().await.unwrap();
            assert!(task.try_start());
            task.send_fragment(bytes::Bytes::from_static(b"hello")).await;
            task.finish().await;
        })
    };

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/v1/chat/completions"))
        .json(&json!({
            "model": "demo-model",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body = resp.text().await.unwrap();
    let mut lines = body.lines();
    assert_eq!(lines.next().unwrap(), "hello");
    assert_eq!(lines.next().unwrap(), r#"{"done":true}"#);
    assert!(lines.next().is_none());

    serving.await.unwrap();
}
