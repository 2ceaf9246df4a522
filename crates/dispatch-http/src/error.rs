use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown model: {0}")]
    ModelNotFound(String),
    #[error("model queue is full")]
    QueueFull,
}

pub type Result<T> = std::result::Result<T, Error>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, err) = match self {
            Error::ModelNotFound(_) => (StatusCode::NOT_FOUND, "model not found"),
            Error::QueueFull => (StatusCode::SERVICE_UNAVAILABLE, "model queue is full"),
        };
        (status, Json(json!({ "err": err }))).into_response()
    }
}
