//! Task lifecycle and per-model scheduling engine for the dispatch router.
//!
//! This crate has no knowledge of HTTP, websockets, or configuration files —
//! it owns only the `Task`/`Worker`/`ModelQueue`/`Registry` state machine and
//! the scheduler loop that moves tasks from arrival to dispatch.

pub mod error;
pub mod model_queue;
pub mod registry;
pub mod scheduler;
pub mod task;
pub mod worker;

pub use error::{Error, Result};
pub use model_queue::ModelQueue;
pub use registry::{Registry, WorkerSpec};
pub use task::{ChatMessage, Task, TaskState};
pub use worker::Worker;
