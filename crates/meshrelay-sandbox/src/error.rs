use thiserror::Error;

/// Sandbox Runner errors (§4.2, §7's transient/permanent/protocol split).
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Transient — spawn failed, or the process exited non-zero before
    /// delivering a single frame. Retryable by the Queue (§7).
    #[error("spawn failed: {0}")]
    SpawnFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Permanent — an additional mount was rejected by the allowlist or
    /// denylist (§4.2).
    #[error("mount denied: {0}")]
    MountDenied(String),

    /// The process exceeded its hard deadline and was forcibly killed
    /// without ever delivering a final frame.
    #[error("sandbox exceeded hard deadline without a result")]
    HardDeadlineExceeded,

    #[error("sandbox process exited with status {0} before producing a result")]
    ExitedWithoutResult(i32),
}

pub type Result<T> = std::result::Result<T, SandboxError>;
