use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::model_queue::ModelQueue;
use crate::task::{Task, TaskState};

/// Scans `queue.nodes` in fixed preference order, issuing to the first
/// eligible worker whose inbox accepts a non-blocking send. Returns whether
/// the task was issued.
fn try_issue(queue: &ModelQueue, task: &Arc<Task>) -> bool {
    for worker in &queue.nodes {
        if !worker.is_eligible() {
            continue;
        }
        if worker.try_dispatch(task.clone()) {
            tracing::info!(
                task_id = task.id,
                worker = %worker.name,
                model = %queue.name,
                "issued task to worker"
            );
            return true;
        }
    }
    false
}

/// Drives one model's arrivals queue for the process lifetime. Every
/// arrival is tried against the current node set immediately; if none are
/// eligible the task parks on `queue.wake` and retries on every capacity
/// change until it is issued, fails its admission timeout, or is otherwise
/// no longer `Pending`.
pub async fn run(queue: Arc<ModelQueue>, mut arrivals_rx: mpsc::Receiver<Arc<Task>>, task_max_pending: Duration) {
    while let Some(task) = arrivals_rx.recv().await {
        park_until_issued(&queue, task, task_max_pending).await;
    }
}

async fn park_until_issued(queue: &ModelQueue, task: Arc<Task>, task_max_pending: Duration) {
    loop {
        // Enabled before the condition check below so a capacity change
        // landing between the check and the await is never missed: `enable`
        // registers this waiter immediately rather than on first poll, so a
        // `notify_waiters()` call in that window still wakes us.
        let notified = queue.wake.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if task.state() != TaskState::Pending {
            return;
        }
        if task.age() > task_max_pending {
            tracing::warn!(task_id = task.id, model = %queue.name, "task exceeded admission timeout");
            task.fail("timeout").await;
            return;
        }
        if try_issue(queue, &task) {
            return;
        }

        tracing::debug!(task_id = task.id, model = %queue.name, "no eligible worker, parking");
        notified.await;
    }
}

pub fn spawn(queue: Arc<ModelQueue>, arrivals_rx: mpsc::Receiver<Arc<Task>>, task_max_pending: Duration) -> JoinHandle<()> {
    tokio::spawn(run(queue, arrivals_rx, task_max_pending))
}
