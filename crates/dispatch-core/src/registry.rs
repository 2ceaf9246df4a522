use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::model_queue::ModelQueue;
use crate::scheduler;
use crate::worker::Worker;

/// Configuration for one compute endpoint, in the order operators listed
/// it — that order becomes the scheduler's dispatch preference among
/// workers serving the same model.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub name: String,
    pub model: String,
    pub token: String,
    pub max_concurrency: i64,
}

/// Lookup tables built once at startup and never mutated afterward: every
/// worker keyed by its connection token, and every model's queue keyed by
/// name. Handed around the process as `Arc<Registry>`.
pub struct Registry {
    pub workers_by_token: HashMap<String, Arc<Worker>>,
    pub models: HashMap<String, Arc<ModelQueue>>,
}

impl Registry {
    /// Builds the registry from `specs` and spawns one scheduler task per
    /// distinct model. Returns the registry and the join handles of the
    /// spawned schedulers so the caller can fold them into shutdown.
    pub fn build(specs: Vec<WorkerSpec>, task_max_pending: Duration) -> (Arc<Registry>, Vec<JoinHandle<()>>) {
        let mut workers_by_token = HashMap::new();
        let mut nodes_by_model: HashMap<String, Vec<Arc<Worker>>> = HashMap::new();

        for spec in specs {
            let worker = Worker::new(spec.name, spec.model.clone(), spec.token.clone(), spec.max_concurrency);
            workers_by_token.insert(spec.token, worker.clone());
            nodes_by_model.entry(spec.model).or_default().push(worker);
        }

        let mut models = HashMap::new();
        let mut handles = Vec::new();
        for (model_name, nodes) in nodes_by_model {
            let (queue, arrivals_rx) = ModelQueue::new(model_name.clone(), nodes);
            handles.push(scheduler::spawn(queue.clone(), arrivals_rx, task_max_pending));
            models.insert(model_name, queue);
        }

        (Arc::new(Registry { workers_by_token, models }), handles)
    }
}
