//! Stream Accumulator (§4.6): presents one progressively-edited outbound
//! message per sandbox invocation when the channel supports editing,
//! otherwise a single final send.

pub mod error;
pub mod state;
pub mod strip;

pub use error::{AccumulatorError, Result};
pub use state::Accumulator;
pub use strip::strip_internal_blocks;
