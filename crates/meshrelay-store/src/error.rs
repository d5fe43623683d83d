use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Core(#[from] meshrelay_core::CoreError),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Database(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
