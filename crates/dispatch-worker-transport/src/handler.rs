use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use dispatch_core::{ModelQueue, Registry, Worker};
use serde::Deserialize;

use crate::error::Error;
use crate::session;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Error::UnknownToken => StatusCode::UNAUTHORIZED.into_response(),
            Error::UnregisteredModel(_) => {
                tracing::error!(error = %self, "worker registered against a model with no scheduler");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

#[derive(Clone)]
pub struct WorkerTransportState {
    pub registry: Arc<Registry>,
}

#[derive(Deserialize)]
pub struct ConnectQuery {
    pub token: String,
}

fn resolve(registry: &Registry, token: &str) -> Result<(Arc<Worker>, Arc<ModelQueue>), Error> {
    let worker = registry
        .workers_by_token
        .get(token)
        .cloned()
        .ok_or(Error::UnknownToken)?;
    let model_queue = registry
        .models
        .get(&worker.model)
        .cloned()
        .ok_or_else(|| Error::UnregisteredModel(worker.model.clone()))?;
    Ok((worker, model_queue))
}

/// `GET /v1/workers/connect?token=...`
///
/// The token is resolved before the upgrade is accepted, so an unknown
/// token never touches the websocket handshake at all.
async fn connect(State(state): State<WorkerTransportState>, Query(query): Query<ConnectQuery>, ws: WebSocketUpgrade) -> Response {
    let (worker, model_queue) = match resolve(&state.registry, &query.token) {
        Ok(pair) => pair,
        Err(err) => return err.into_response(),
    };

    ws.on_upgrade(move |socket| async move {
        session::run(socket, worker, model_queue).await;
    })
}

pub fn router(state: WorkerTransportState) -> Router {
    Router::new()
        .route("/v1/workers/connect", get(connect))
        .with_state(state)
}
