use async_trait::async_trait;

use crate::types::{OutboundMessage, QueryRequest, TaskRequest};

/// Callback surface the bridge drives as it discovers new files in a group's
/// `messages/`, `tasks/`, and `queries/` directories. Implemented by the
/// dispatcher, which owns the channel registry, the task store, and the
/// query adapter — the bridge itself only knows about files (§4.3).
#[async_trait]
pub trait IpcEventSink: Send + Sync {
    async fn on_message(&self, folder: &str, message: OutboundMessage);
    async fn on_task(&self, folder: &str, task: TaskRequest);
    async fn on_query(&self, folder: &str, query: QueryRequest);
}
