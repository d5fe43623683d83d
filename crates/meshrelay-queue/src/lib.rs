//! Group Queue (§4.1): per-group serialization, a global concurrency cap,
//! task-over-message priority, and exponential-backoff retry.

pub mod dispatch;
pub mod error;
pub mod process;
pub mod queue;

pub use dispatch::{GroupDispatch, WorkItem};
pub use error::{QueueError, Result};
pub use process::ProcessHandle;
pub use queue::{GroupQueue, RETRY_BASE_SECS, RETRY_MAX_ATTEMPTS};
