//! The work the Queue drives per group, injected so this crate stays free
//! of a direct dependency on the Sandbox Runner / Stream Accumulator.

use async_trait::async_trait;
use meshrelay_core::ScheduledTask;

use crate::error::Result;

/// One unit of work the Queue hands to a group's worker loop.
#[derive(Debug, Clone)]
pub enum WorkItem {
    MessageCheck,
    Task(ScheduledTask),
}

/// Implemented by the component that actually spawns and drives sandboxes
/// (`meshrelay-dispatch`). The Queue calls back into this for every work
/// item it pops, serialized per group (§4.1).
#[async_trait]
pub trait GroupDispatch: Send + Sync {
    async fn run(&self, jid: &str, item: WorkItem) -> Result<()>;
}
