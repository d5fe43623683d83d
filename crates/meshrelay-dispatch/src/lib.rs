//! Wires the Group Queue, the Message Loop, and the IPC Bridge to a single
//! set of collaborators and drives sandbox invocations end to end (§4.2,
//! §4.4, §4.5, §4.7).

pub mod commands;
pub mod error;
pub mod message_loop;
pub mod mounts;
pub mod orchestrator;
pub mod process_handle;
pub mod prompt;
pub mod trigger;

pub use commands::{build_catalog, handle_command, resolve_model, CommandEffect, CommandResponse, ModelCatalogEntry};
pub use error::{DispatchError, Result};
pub use message_loop::MessageLoop;
pub use mounts::build_mounts;
pub use orchestrator::Orchestrator;
pub use process_handle::SandboxProcessHandle;
