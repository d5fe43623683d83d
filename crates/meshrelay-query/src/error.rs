use thiserror::Error;

/// External Query Adapter errors (§4.8). All of these degrade to a
/// `QueryStatus::Error` response rather than propagating — the adapter
/// never lets a bad query crash the dispatcher.
#[derive(Debug, Error)]
pub enum QueryAdapterError {
    #[error("unknown query type: {0}")]
    UnknownQueryType(String),

    #[error("query type {0} requires the main group")]
    WriteNotAllowed(String),

    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        binary: String,
        source: std::io::Error,
    },

    #[error("query timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("query exited with status {status}: {stderr}")]
    NonZeroExit { status: i32, stderr: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, QueryAdapterError>;
