//! Wires a loaded `Config` into a running `Registry` plus the two public
//! routers (HTTP ingress and worker websocket).

use std::sync::Arc;
use std::time::Duration;

use dispatch_core::{Registry, WorkerSpec};
use dispatch_http::IngressState;
use dispatch_worker_transport::WorkerTransportState;
use tokio::task::JoinHandle;

use crate::config::Config;

/// Builds the registry from `config.compute_nodes`, spawning one scheduler
/// task per distinct model.
pub fn build_registry(config: &Config) -> (Arc<Registry>, Vec<JoinHandle<()>>) {
    let specs = config
        .compute_nodes
        .iter()
        .map(|(name, node)| WorkerSpec {
            name: name.clone(),
            model: node.model.clone(),
            token: node.token.clone(),
            max_concurrency: node.max_concurrency,
        })
        .collect();
    Registry::build(specs, task_max_pending(config))
}

fn task_max_pending(config: &Config) -> Duration {
    config.task_max_pending_time()
}

pub fn ingress_router(registry: Arc<Registry>) -> axum::Router {
    dispatch_http::router(IngressState { registry })
}

pub fn worker_router(registry: Arc<Registry>) -> axum::Router {
    dispatch_worker_transport::router(WorkerTransportState { registry })
}

/// Converts the original implementation's Go-style `:PORT` bind address
/// (meaning "all interfaces") into the explicit form Rust's `TcpListener`
/// expects.
pub fn normalize_bind_addr(host: &str) -> String {
    if let Some(port) = host.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        host.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_colon_prefixed_host() {
        assert_eq!(normalize_bind_addr(":8087"), "0.0.0.0:8087");
    }

    #[test]
    fn leaves_explicit_host_untouched() {
        assert_eq!(normalize_bind_addr("127.0.0.1:8087"), "127.0.0.1:8087");
    }
}
