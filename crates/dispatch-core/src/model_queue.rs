use std::sync::Arc;

use tokio::sync::{mpsc, Notify};

use crate::error::{Error, Result};
use crate::task::Task;
use crate::worker::Worker;

/// Capacity of a model's arrival queue before `submit` starts rejecting
/// with `Error::QueueFull`.
pub const ARRIVALS_CAPACITY: usize = 1000;

/// Per-model arrival queue and the set of workers eligible to serve it.
/// `nodes` order is fixed at construction and is the scheduler's
/// tie-breaking preference: earlier entries are tried first on every
/// dispatch attempt.
pub struct ModelQueue {
    pub name: String,
    pub nodes: Vec<Arc<Worker>>,
    arrivals_tx: mpsc::Sender<Arc<Task>>,
    /// Signaled whenever a worker's eligibility might have changed (a task
    /// completed, a new session started), so parked tasks can retry without
    /// polling.
    pub wake: Notify,
}

impl ModelQueue {
    pub fn new(name: String, nodes: Vec<Arc<Worker>>) -> (Arc<ModelQueue>, mpsc::Receiver<Arc<Task>>) {
        let (arrivals_tx, arrivals_rx) = mpsc::channel(ARRIVALS_CAPACITY);
        (
            Arc::new(ModelQueue {
                name,
                nodes,
                arrivals_tx,
                wake: Notify::new(),
            }),
            arrivals_rx,
        )
    }

    /// Non-blocking submission into the arrivals queue.
    pub fn submit(&self, task: Arc<Task>) -> Result<()> {
        self.arrivals_tx.try_send(task).map_err(|_| Error::QueueFull)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ChatMessage;

    fn new_task() -> Arc<Task> {
        let (task, _rx) = Task::new(
            "m".to_string(),
            String::new(),
            vec![ChatMessage { role: "user".to_string(), content: "hi".to_string() }],
            8,
        );
        task
    }

    #[test]
    fn submit_rejects_once_arrivals_is_saturated() {
        let (queue, _arrivals_rx) = ModelQueue::new("m".into(), vec![]);
        for _ in 0..ARRIVALS_CAPACITY {
            queue.submit(new_task()).expect("capacity not yet exhausted");
        }
        assert!(matches!(queue.submit(new_task()), Err(Error::QueueFull)));
    }
}
