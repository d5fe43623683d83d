use thiserror::Error;

/// IPC Bridge errors (§4.3). Malformed payloads are not represented here —
/// those are quarantined to `errors/` rather than surfaced as a `Result::Err`.
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Core(#[from] meshrelay_core::CoreError),

    #[error("unknown ipc group: {0}")]
    UnknownGroup(String),
}

pub type Result<T> = std::result::Result<T, IpcError>;
