use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dispatch_core::{ChatMessage, Registry, Task, WorkerSpec};
use dispatch_worker_transport::{router, WorkerTransportState};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;

async fn spawn_server() -> (SocketAddr, Arc<Registry>) {
    let specs = vec![WorkerSpec {
        name: "worker-a".into(),
        model: "demo-model".into(),
        token: "secret-token".into(),
        max_concurrency: 2,
    }];
    let (registry, _handles) = Registry::build(specs, Duration::from_secs(30));

    let app = router(WorkerTransportState { registry: registry.clone() });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, registry)
}

fn new_demo_task() -> (Arc<Task>, tokio::sync::mpsc::Receiver<Option<bytes::Bytes>>) {
    Task::new(
        "demo-model".to_string(),
        String::new(),
        vec![ChatMessage { role: "user".into(), content: "hi".into() }],
        16,
    )
}

#[tokio::test]
async fn unknown_token_is_rejected_before_upgrade() {
    let (addr, _registry) = spawn_server().await;
    let url = format!("ws://{addr}/v1/workers/connect?token=wrong");
    let err = tokio_tungstenite::connect_async(url).await.unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(resp) => {
            assert_eq!(resp.status(), 401);
        }
        other => panic!("expected an HTTP rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn dispatched_task_streams_fragments_and_completes() {
    let (addr, registry) = spawn_server().await;
    let url = format!("ws://{addr}/v1/workers/connect?token=secret-token");
    let (mut ws_stream, _resp) = tokio_tungstenite::connect_async(url).await.unwrap();

    // Give the session time to mark the worker eligible.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (task, mut response_rx) = new_demo_task();
    let model_queue = registry.models.get("demo-model").unwrap();
    model_queue.submit(task.clone()).unwrap();
    model_queue.wake.notify_waiters();

    let task_request = ws_stream.next().await.unwrap().unwrap();
    let text = match task_request {
        WsMessage::Text(t) => t,
        other => panic!("expected a text task-request frame, got {other:?}"),
    };
    let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
    let task_id = parsed["id"].as_u64().unwrap() as u32;
    assert_eq!(task_id, task.id);

    let mut fragment = task_id.to_be_bytes().to_vec();
    fragment.extend_from_slice(b"hello");
    ws_stream.send(WsMessage::Binary(fragment)).await.unwrap();

    let first = response_rx.recv().await.unwrap().unwrap();
    assert_eq!(first.as_ref(), b"hello");

    ws_stream
        .send(WsMessage::Binary(task_id.to_be_bytes().to_vec()))
        .await
        .unwrap();

    let done = response_rx.recv().await.unwrap().unwrap();
    assert_eq!(done.as_ref(), br#"{"done":true}"#);
    let sentinel = response_rx.recv().await.unwrap();
    assert!(sentinel.is_none());
}

#[tokio::test]
async fn worker_death_mid_task_fails_survivors() {
    let (addr, registry) = spawn_server().await;
    let url = format!("ws://{addr}/v1/workers/connect?token=secret-token");
    let (mut ws_stream, _resp) = tokio_tungstenite::connect_async(url).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (task, mut response_rx) = new_demo_task();
    let model_queue = registry.models.get("demo-model").unwrap();
    model_queue.submit(task.clone()).unwrap();
    model_queue.wake.notify_waiters();

    let _ = ws_stream.next().await.unwrap().unwrap();

    // The worker vanishes without a close handshake.
    drop(ws_stream);

    let frag = tokio::time::timeout(Duration::from_secs(2), response_rx.recv())
        .await
        .expect("task was never failed after the worker disappeared")
        .unwrap()
        .unwrap();
    assert_eq!(frag.as_ref(), br#"{"err":"node has gone away"}"#);
}

#[tokio::test]
async fn second_connection_evicts_the_first() {
    let (addr, registry) = spawn_server().await;
    let url = format!("ws://{addr}/v1/workers/connect?token=secret-token");
    let (mut first, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(registry
        .workers_by_token
        .get("secret-token")
        .unwrap()
        .is_eligible());

    let (second, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let closed = tokio::time::timeout(Duration::from_secs(2), first.next())
        .await
        .expect("first connection was never closed by the server");
    assert!(
        closed.is_none() || matches!(closed, Some(Err(_))) || matches!(closed, Some(Ok(WsMessage::Close(_))))
    );

    drop(second);
}
