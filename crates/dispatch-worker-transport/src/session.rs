use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use dispatch_core::{ModelQueue, Task, TaskState, Worker};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex};

#[derive(Serialize)]
struct StopFrame {
    id: u32,
    stop: bool,
}

type TaskMap = Mutex<HashMap<u32, Arc<Task>>>;

/// Drives one worker's duplex connection end to end.
///
/// Any session currently holding `worker.session_lock` is evicted before
/// this one attempts to acquire it, so a duplicate connection never waits
/// behind a peer that has gone silent without closing its socket. Once the
/// lock is held, an outbound actor is spawned to drain the worker's inbox
/// and forward stop requests while this task reads incoming frames. On
/// exit — clean close, socket error, or eviction by a newer connection —
/// every task still tracked for this session is failed and the worker is
/// marked sessionless again.
pub async fn run(socket: WebSocket, worker: Arc<Worker>, model_queue: Arc<ModelQueue>) {
    let _ = worker.evict.send(());

    let _session_guard = worker.session_lock.lock().await;
    let mut evict_rx = worker.evict.subscribe();

    worker.mark_session_started();
    tracing::info!(worker = %worker.name, model = %worker.model, "worker session established");

    let (ws_tx, mut ws_rx) = socket.split();
    let task_map: Arc<TaskMap> = Arc::new(Mutex::new(HashMap::new()));
    let (stop_tx, stop_rx) = mpsc::channel::<u32>(100);
    let (end_tx, end_rx) = oneshot::channel::<()>();

    let outbound = tokio::spawn(run_outbound(worker.clone(), ws_tx, stop_rx, end_rx, task_map.clone()));

    loop {
        tokio::select! {
            biased;
            _ = evict_rx.recv() => {
                tracing::info!(worker = %worker.name, "session evicted by a newer connection");
                break;
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        if !handle_binary_frame(&worker, &model_queue, &task_map, &stop_tx, data).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!(worker = %worker.name, %text, "ignoring text frame from worker");
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::warn!(worker = %worker.name, error = %err, "worker socket error");
                        break;
                    }
                }
            }
        }
    }

    let _ = end_tx.send(());
    let _ = outbound.await;

    worker.mark_session_ended();
    model_queue.wake.notify_waiters();

    let mut map = task_map.lock().await;
    for (_, task) in map.drain() {
        task.fail("node has gone away").await;
    }
    tracing::info!(worker = %worker.name, "worker session torn down");
}

/// Handles one inbound binary frame. Returns `false` when the frame is
/// malformed and the session should be torn down rather than limp along
/// unable to correlate further traffic to a task.
async fn handle_binary_frame(
    worker: &Arc<Worker>,
    model_queue: &Arc<ModelQueue>,
    task_map: &Arc<TaskMap>,
    stop_tx: &mpsc::Sender<u32>,
    data: Vec<u8>,
) -> bool {
    if data.len() < 4 {
        tracing::warn!(worker = %worker.name, len = data.len(), "frame too short to carry a task id");
        return false;
    }
    let id = u32::from_be_bytes(data[0..4].try_into().expect("length checked above"));

    let task = { task_map.lock().await.get(&id).cloned() };
    let Some(task) = task else {
        tracing::debug!(worker = %worker.name, task_id = id, "frame for unknown or already-finished task");
        return true;
    };

    if data.len() > 4 {
        if task.state() != TaskState::Running {
            let _ = stop_tx.send(id).await;
            task_map.lock().await.remove(&id);
            return true;
        }
        let fragment = Bytes::copy_from_slice(&data[4..]);
        if !task.send_fragment(fragment).await {
            task_map.lock().await.remove(&id);
        }
    } else {
        worker.task_completed();
        model_queue.wake.notify_waiters();
        task.finish().await;
        task_map.lock().await.remove(&id);
    }
    true
}

/// Drains the worker's inbox onto the socket and forwards stop requests,
/// registering every dispatched task into `task_map` so the inbound loop
/// can correlate response frames back to it.
async fn run_outbound(
    worker: Arc<Worker>,
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut stop_rx: mpsc::Receiver<u32>,
    mut end_rx: oneshot::Receiver<()>,
    task_map: Arc<TaskMap>,
) {
    let mut inbox_rx = worker.inbox_rx.lock().await;
    loop {
        tokio::select! {
            biased;
            _ = &mut end_rx => break,
            Some(id) = stop_rx.recv() => {
                let frame = serde_json::to_string(&StopFrame { id, stop: true }).expect("StopFrame always serializes");
                if ws_tx.send(Message::Text(frame)).await.is_err() {
                    let _ = worker.evict.send(());
                    break;
                }
            }
            maybe_task = inbox_rx.recv() => {
                match maybe_task {
                    None => break,
                    Some(task) => {
                        if !task.try_start() {
                            continue;
                        }
                        let payload = task.to_wire_json();
                        task_map.lock().await.insert(task.id, task.clone());
                        if ws_tx.send(Message::Text(payload)).await.is_err() {
                            task_map.lock().await.remove(&task.id);
                            task.fail("error writing message").await;
                            // The read half won't notice a dead socket on its own in
                            // time; trip the evict signal so the inbound loop tears
                            // the session down now instead of waiting on a read error
                            // that may never come.
                            let _ = worker.evict.send(());
                            break;
                        }
                        worker.task_issued();
                    }
                }
            }
        }
    }
}
