use thiserror::Error;

/// Errors surfaced by the scheduling engine itself, as opposed to the
/// transport crates wrapping it.
#[derive(Debug, Error)]
pub enum Error {
    #[error("model queue is full")]
    QueueFull,
}

pub type Result<T> = std::result::Result<T, Error>;
