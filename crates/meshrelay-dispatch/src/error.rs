use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0}")]
    Core(#[from] meshrelay_core::CoreError),

    #[error("{0}")]
    Store(#[from] meshrelay_store::StoreError),

    #[error("{0}")]
    Session(#[from] meshrelay_sessions::SessionStateError),

    #[error("{0}")]
    Sandbox(#[from] meshrelay_sandbox::SandboxError),

    #[error("{0}")]
    Channel(#[from] meshrelay_channels::ChannelError),

    #[error("{0}")]
    Scheduler(#[from] meshrelay_scheduler::SchedulerError),

    #[error("{0}")]
    Accumulator(#[from] meshrelay_accumulator::AccumulatorError),

    #[error("group {0} is not registered")]
    UnknownGroup(String),

    #[error("group {0} has no configured runtime")]
    NoRuntime(String),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
