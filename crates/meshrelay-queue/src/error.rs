use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("{0}")]
    Core(#[from] meshrelay_core::CoreError),

    #[error("group {0} is not known to the queue")]
    UnknownGroup(String),
}

pub type Result<T> = std::result::Result<T, QueueError>;
