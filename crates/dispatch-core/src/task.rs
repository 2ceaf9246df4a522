use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Capacity of a task's response-fragment channel.
const RESPONSE_CHAN_CAPACITY: usize = 100;

/// Bound on how long a fragment send may block before the caller moves on.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// One chat turn, forwarded to the worker verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Lifecycle state of a `Task`. Transitions are one-way: Pending -> Running
/// -> Done. A task may also jump straight from Pending to Done (failed
/// before any worker claimed it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    Pending = 0,
    Running = 1,
    Done = 2,
}

impl TaskState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskState::Pending,
            1 => TaskState::Running,
            _ => TaskState::Done,
        }
    }
}

#[derive(Serialize)]
struct TaskWire<'a> {
    id: u32,
    model: &'a str,
    system: &'a str,
    messages: &'a [ChatMessage],
    #[serde(rename = "maxNewTokens")]
    max_new_tokens: u32,
}

#[derive(Serialize)]
struct DoneFrame {
    done: bool,
}

#[derive(Serialize)]
struct ErrFrame<'a> {
    err: &'a str,
}

/// A single client chat request in flight, plus the channel its streamed
/// response is delivered over. Shared between the ingress handler (reads
/// the response stream) and the worker session (writes response fragments).
pub struct Task {
    pub id: u32,
    pub model: String,
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub max_new_tokens: u32,
    created_at: Instant,
    state: AtomicU8,
    response_tx: mpsc::Sender<Option<Bytes>>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("model", &self.model)
            .field("state", &self.state())
            .finish()
    }
}

impl Task {
    /// Builds a task in the `Pending` state. Returns the task plus the
    /// receiving half of its response stream, which the ingress handler
    /// drains until the close-sentinel (`None`).
    pub fn new(
        model: String,
        system: String,
        messages: Vec<ChatMessage>,
        max_new_tokens: u32,
    ) -> (Arc<Task>, mpsc::Receiver<Option<Bytes>>) {
        let (response_tx, response_rx) = mpsc::channel(RESPONSE_CHAN_CAPACITY);
        let task = Task {
            id: rand::random(),
            model,
            system,
            messages,
            max_new_tokens,
            created_at: Instant::now(),
            state: AtomicU8::new(TaskState::Pending as u8),
            response_tx,
        };
        (Arc::new(task), response_rx)
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Time since admission, used by the scheduler to enforce the
    /// task-admission timeout while a task sits parked waiting for
    /// capacity.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// `Pending -> Running`. Returns whether this caller won the race; a
    /// loser must not touch the task further.
    pub fn try_start(&self) -> bool {
        self.state
            .compare_exchange(
                TaskState::Pending as u8,
                TaskState::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Enqueues a raw response fragment, bounded by `SEND_TIMEOUT`. Returns
    /// `false` if the receiver is gone or the send timed out, in which case
    /// the caller should treat the task as abandoned.
    pub async fn send_fragment(&self, buf: Bytes) -> bool {
        timeout(SEND_TIMEOUT, self.response_tx.send(Some(buf)))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    async fn close_stream(&self) {
        let _ = timeout(SEND_TIMEOUT, self.response_tx.send(None)).await;
    }

    /// `Running -> Done`, emitting a `{"done":true}` fragment and closing
    /// the response stream. No-op if the task was not `Running`.
    pub async fn finish(&self) {
        if !self.transition_to_done_from_running() {
            return;
        }
        let frame = serde_json::to_vec(&DoneFrame { done: true }).expect("DoneFrame always serializes");
        if self.send_fragment(Bytes::from(frame)).await {
            self.close_stream().await;
        }
    }

    /// `Pending|Running -> Done`, emitting a `{"err":reason}` fragment and
    /// closing the response stream. No-op if the task is already `Done`.
    pub async fn fail(&self, reason: &str) {
        if !self.transition_to_done_from_pending() && !self.transition_to_done_from_running() {
            return;
        }
        let frame = serde_json::to_vec(&ErrFrame { err: reason }).expect("ErrFrame always serializes");
        if self.send_fragment(Bytes::from(frame)).await {
            self.close_stream().await;
        }
    }

    fn transition_to_done_from_pending(&self) -> bool {
        self.state
            .compare_exchange(
                TaskState::Pending as u8,
                TaskState::Done as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    fn transition_to_done_from_running(&self) -> bool {
        self.state
            .compare_exchange(
                TaskState::Running as u8,
                TaskState::Done as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Wire form dispatched to the worker over the duplex connection.
    pub fn to_wire_json(&self) -> String {
        serde_json::to_string(&TaskWire {
            id: self.id,
            model: &self.model,
            system: &self.system,
            messages: &self.messages,
            max_new_tokens: self.max_new_tokens,
        })
        .expect("TaskWire always serializes")
    }
}
