//! External Query Adapter (§4.8): fixed-argv, no-shell, time-bounded
//! execution of allowlisted read/write query types for sandboxed agents.

pub mod adapter;
pub mod error;

pub use adapter::QueryAdapter;
pub use error::{QueryAdapterError, Result};
