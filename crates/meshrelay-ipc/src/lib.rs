//! IPC Bridge (§4.3): a filesystem-based bidirectional channel between the
//! host and the sandboxes it spawns, one directory tree per group.

pub mod atomic;
pub mod bridge;
pub mod error;
pub mod layout;
pub mod sink;
pub mod types;

pub use atomic::{atomic_write, atomic_write_json, timestamped_filename};
pub use bridge::IpcBridge;
pub use error::{IpcError, Result};
pub use layout::GroupIpcPaths;
pub use sink::IpcEventSink;
pub use types::{
    FollowUpInput, OutboundMessage, QueryRequest, QueryResponse, QueryStatus, ScheduleRequest,
    TaskRequest,
};
