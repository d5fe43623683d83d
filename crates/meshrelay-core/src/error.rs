use thiserror::Error;

/// Cross-cutting error variants shared by every subsystem crate.
///
/// Subsystem crates (`meshrelay-queue`, `meshrelay-sandbox`, `meshrelay-ipc`,
/// `meshrelay-scheduler`, `meshrelay-query`, …) define their own narrower
/// error enum with a `#[from] CoreError` arm plus variants for their own
/// permanent/transient/protocol distinctions (see §7 of the spec).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Short error code, stable across versions, useful for log greps and
    /// client-facing responses.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Config(_) => "CONFIG_ERROR",
            CoreError::Database(_) => "DATABASE_ERROR",
            CoreError::Serialization(_) => "SERIALIZATION_ERROR",
            CoreError::Io(_) => "IO_ERROR",
            CoreError::Timeout { .. } => "TIMEOUT",
            CoreError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the Group Queue's backoff-and-retry policy (§4.1, §7) should
    /// retry the work item that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::Database(_) | CoreError::Io(_) | CoreError::Timeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
