//! Dispatch router binary.
//!
//! Loads configuration, builds the scheduling registry, and serves two
//! listeners: the HTTP chat ingress and the worker websocket endpoint.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dispatch_server::app;
use dispatch_server::{Config, LoadOutcome};

#[derive(Parser, Debug)]
#[command(name = "dispatch-server")]
struct Args {
    /// Path to the JSON config file. Created with a default worker and
    /// user on first run, after which the process exits.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(LoadOutcome::FirstRun(path)) => {
            tracing::info!(path = %path.display(), "no config found, wrote a default one; edit it and restart");
            return Ok(());
        }
        Ok(LoadOutcome::Loaded(config)) => config,
        Err(err) => {
            tracing::error!(error = %err, "failed to load config");
            std::process::exit(1);
        }
    };

    let (registry, scheduler_handles) = app::build_registry(&config);
    tracing::info!(
        workers = registry.workers_by_token.len(),
        models = registry.models.len(),
        "registry built"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let http_addr = app::normalize_bind_addr(&config.api_host);
    let http_listener = TcpListener::bind(&http_addr).await?;
    tracing::info!(addr = %http_addr, "HTTP ingress listening");
    let http_router = app::ingress_router(registry.clone());
    let http_shutdown = shutdown_tx.subscribe();
    let http_handle = tokio::spawn(async move {
        let result = axum::serve(http_listener, http_router)
            .with_graceful_shutdown(wait_for_shutdown(http_shutdown))
            .await;
        if let Err(err) = result {
            tracing::error!(error = %err, "HTTP ingress server exited with an error");
        }
    });

    let ws_addr = app::normalize_bind_addr(&config.ws_host);
    let ws_listener = TcpListener::bind(&ws_addr).await?;
    tracing::info!(addr = %ws_addr, "worker websocket listening");
    let ws_router = app::worker_router(registry.clone());
    let ws_shutdown = shutdown_tx.subscribe();
    let ws_handle = tokio::spawn(async move {
        let result = axum::serve(ws_listener, ws_router)
            .with_graceful_shutdown(wait_for_shutdown(ws_shutdown))
            .await;
        if let Err(err) = result {
            tracing::error!(error = %err, "worker websocket server exited with an error");
        }
    });

    shutdown_signal().await;
    tracing::info!("shutdown signal received, shutting down");
    let _ = shutdown_tx.send(());

    let _ = http_handle.await;
    let _ = ws_handle.await;
    for handle in scheduler_handles {
        handle.abort();
    }

    tracing::info!("dispatch-server shutdown complete");
    Ok(())
}

async fn wait_for_shutdown(mut rx: broadcast::Receiver<()>) {
    let _ = rx.recv().await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
