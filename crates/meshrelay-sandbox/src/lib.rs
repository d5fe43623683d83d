//! Sandbox Runner (§4.2): spawns one isolated subprocess per agent
//! invocation, streams its framed stdout protocol, and enforces idle and
//! hard-deadline timers.

pub mod error;
pub mod frame;
pub mod mount;
pub mod runner;
pub mod types;

pub use error::{Result, SandboxError};
pub use runner::{process_name, scan_orphans, ActiveSandbox, FrameCallback, RunOutcome, SandboxRunner};
pub use types::{FrameEvent, MountSpec, SandboxFrame, SandboxInput, SpawnRequest};
