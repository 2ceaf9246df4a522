use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use dispatch_core::{ChatMessage, Registry, Task};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::Error;

/// How long the stream waits for the next fragment before failing the
/// task with a timeout and closing the response.
const RESPONSE_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Capacity of the internal channel feeding the chunked HTTP body. Kept
/// small; it only needs to smooth over the gap between a fragment arriving
/// and hyper pulling the next body chunk.
const OUT_CHAN_CAPACITY: usize = 16;

#[derive(Clone)]
pub struct IngressState {
    pub registry: Arc<Registry>,
}

#[derive(Deserialize)]
pub struct ChatRequest {
    pub model: String,
    #[serde(default)]
    pub system: String,
    pub messages: Vec<ChatMessage>,
    #[serde(rename = "maxNewTokens", default = "default_max_new_tokens")]
    pub max_new_tokens: u32,
}

fn default_max_new_tokens() -> u32 {
    512
}

/// `POST /v1/chat/completions` — admits the request onto its model's
/// arrival queue and streams the task's response fragments back as
/// newline-delimited JSON as they are produced.
async fn submit(State(state): State<IngressState>, Json(req): Json<ChatRequest>) -> Response {
    let model_queue = match state.registry.models.get(&req.model).cloned() {
        Some(q) => q,
        None => return Error::ModelNotFound(req.model).into_response(),
    };

    let (task, response_rx) = Task::new(req.model, req.system, req.messages, req.max_new_tokens);
    if model_queue.submit(task.clone()).is_err() {
        return Error::QueueFull.into_response();
    }
    model_queue.wake.notify_waiters();

    let body = Body::from_stream(response_stream(task, response_rx));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(body)
        .expect("response headers are always valid")
}

fn response_stream(
    task: Arc<Task>,
    response_rx: mpsc::Receiver<Option<Bytes>>,
) -> ReceiverStream<std::io::Result<Bytes>> {
    let (out_tx, out_rx) = mpsc::channel(OUT_CHAN_CAPACITY);
    tokio::spawn(forward_response(task, response_rx, out_tx));
    ReceiverStream::new(out_rx)
}

/// Drains `response_rx` onto `out_tx` as newline-terminated NDJSON chunks
/// until the close sentinel (`None`) arrives. Fails the task with a
/// timeout if no fragment shows up within `RESPONSE_IDLE_TIMEOUT`, and with
/// "client gone" if the client disconnects mid-stream.
async fn forward_response(task: Arc<Task>, mut response_rx: mpsc::Receiver<Option<Bytes>>, out_tx: mpsc::Sender<std::io::Result<Bytes>>) {
    loop {
        let next = match tokio::time::timeout(RESPONSE_IDLE_TIMEOUT, response_rx.recv()).await {
            Ok(next) => next,
            Err(_) => {
                tracing::warn!(task_id = task.id, "no response fragment within the idle timeout");
                task.fail("timeout").await;
                continue;
            }
        };
        match next {
            Some(Some(fragment)) => {
                let mut line = Vec::with_capacity(fragment.len() + 1);
                line.extend_from_slice(&fragment);
                line.push(b'\n');
                if out_tx.send(Ok(Bytes::from(line))).await.is_err() {
                    tracing::debug!(task_id = task.id, "client disconnected mid-stream");
                    task.fail("client gone").await;
                    return;
                }
            }
            Some(None) | None => return,
        }
    }
}

pub fn router(state: IngressState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/chat/completions", post(submit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
