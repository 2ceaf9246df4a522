use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex};

use crate::task::Task;

/// Capacity of a worker's dispatch inbox. Kept at 1 so the scheduler never
/// hands a worker more than one task it hasn't yet accepted off the channel.
pub const INBOX_CAPACITY: usize = 1;

/// Sentinel value of `processing_tasks` meaning "no live session" — a
/// worker in this state is never eligible for dispatch.
pub const NO_SESSION: i64 = -1;

/// A registered compute endpoint serving exactly one model over a
/// persistent duplex connection. One `Worker` exists per configured entry
/// and lives for the process lifetime; only its session-scoped state
/// (`processing_tasks`, the inbox) changes as connections come and go.
pub struct Worker {
    pub name: String,
    pub model: String,
    pub token: String,
    pub max_concurrency: i64,
    processing_tasks: AtomicI64,
    inbox_tx: mpsc::Sender<Arc<Task>>,
    pub inbox_rx: Mutex<mpsc::Receiver<Arc<Task>>>,
    /// Held for the duration of one worker session; a second connection
    /// presenting the same token blocks here until the first session's
    /// teardown releases it.
    pub session_lock: Mutex<()>,
    /// Broadcast used to force a stale session to exit before a new one
    /// takes `session_lock`, so a duplicate connection does not wait behind
    /// a session that is never coming back.
    pub evict: broadcast::Sender<()>,
}

impl Worker {
    pub fn new(name: String, model: String, token: String, max_concurrency: i64) -> Arc<Worker> {
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let (evict, _) = broadcast::channel(1);
        Arc::new(Worker {
            name,
            model,
            token,
            max_concurrency,
            processing_tasks: AtomicI64::new(NO_SESSION),
            inbox_tx,
            inbox_rx: Mutex::new(inbox_rx),
            session_lock: Mutex::new(()),
            evict,
        })
    }

    pub fn processing_tasks(&self) -> i64 {
        self.processing_tasks.load(Ordering::SeqCst)
    }

    /// A worker is eligible for dispatch only while it has a live session
    /// (`processing_tasks >= 0`) and is below its configured concurrency.
    pub fn is_eligible(&self) -> bool {
        let pt = self.processing_tasks();
        pt >= 0 && pt < self.max_concurrency
    }

    /// Non-blocking handoff from the scheduler into this worker's session.
    /// Fails silently if the inbox already holds an unclaimed task or no
    /// session is listening; the scheduler treats that as "try the next
    /// worker."
    pub fn try_dispatch(&self, task: Arc<Task>) -> bool {
        self.inbox_tx.try_send(task).is_ok()
    }

    pub fn mark_session_started(&self) {
        self.processing_tasks.store(0, Ordering::SeqCst);
    }

    pub fn mark_session_ended(&self) {
        self.processing_tasks.store(NO_SESSION, Ordering::SeqCst);
    }

    pub fn task_issued(&self) {
        self.processing_tasks.fetch_add(1, Ordering::SeqCst);
    }

    pub fn task_completed(&self) {
        self.processing_tasks.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ineligible_without_a_session() {
        let worker = Worker::new("w1".into(), "m1".into(), "tok".into(), 4);
        assert!(!worker.is_eligible());
    }

    #[test]
    fn eligible_strictly_below_max_concurrency() {
        let worker = Worker::new("w1".into(), "m1".into(), "tok".into(), 2);
        worker.mark_session_started();
        assert!(worker.is_eligible());
        worker.task_issued();
        assert!(worker.is_eligible());
        worker.task_issued();
        assert!(!worker.is_eligible());
        worker.task_completed();
        assert!(worker.is_eligible());
    }

    #[test]
    fn session_end_resets_to_sentinel() {
        let worker = Worker::new("w1".into(), "m1".into(), "tok".into(), 2);
        worker.mark_session_started();
        worker.task_issued();
        worker.mark_session_ended();
        assert_eq!(worker.processing_tasks(), NO_SESSION);
        assert!(!worker.is_eligible());
    }
}
