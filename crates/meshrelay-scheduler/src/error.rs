use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("{0}")]
    Core(#[from] meshrelay_core::CoreError),

    #[error("{0}")]
    Store(#[from] meshrelay_store::StoreError),

    #[error("invalid cron expression {expression:?}: {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("unknown timezone {0:?}")]
    UnknownTimezone(String),

    #[error("task {0} not found")]
    TaskNotFound(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
