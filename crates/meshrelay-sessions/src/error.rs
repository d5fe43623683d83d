use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionStateError {
    #[error("{0}")]
    Store(#[from] meshrelay_store::StoreError),

    #[error("group folder not registered: {0}")]
    UnknownGroup(String),
}

pub type Result<T> = std::result::Result<T, SessionStateError>;
