use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown worker token")]
    UnknownToken,
    #[error("worker serves an unregistered model: {0}")]
    UnregisteredModel(String),
}

pub type Result<T> = std::result::Result<T, Error>;
