//! The persistence capability the core consumes (§6 "Store capability").
//!
//! The core never issues multi-statement transactions — the per-group serial
//! invariant is enforced in-memory by `meshrelay-queue`, so individual
//! statements are sufficient (§5). `SqliteStore` is the default backend; a
//! second implementation (Postgres-shaped) is a second impl of [`Store`],
//! not a rewrite of the callers.

pub mod db;
pub mod error;
pub mod sqlite;

pub use error::{Result, StoreError};
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use meshrelay_core::{Group, GroupFolder, Jid, Message, ScheduledTask, TaskRunLog, Timestamp};
use std::collections::HashMap;

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_registered_groups(&self) -> Result<Vec<Group>>;
    async fn set_registered_group(&self, group: Group) -> Result<()>;

    async fn get_all_sessions(&self) -> Result<HashMap<GroupFolder, String>>;
    async fn set_session(&self, folder: &GroupFolder, session_id: &str) -> Result<()>;
    async fn delete_session(&self, folder: &GroupFolder) -> Result<()>;

    /// Messages across any of `jids` with `timestamp > since_ts`, in
    /// timestamp order (§4.4 step 1).
    async fn get_new_messages(&self, jids: &[Jid], since_ts: &Timestamp) -> Result<Vec<Message>>;
    /// All messages for `jid` with `timestamp > since_ts`, in timestamp
    /// order (§4.4 step 1.b).
    async fn get_messages_since(&self, jid: &Jid, since_ts: &Timestamp) -> Result<Vec<Message>>;
    async fn store_message(&self, msg: &Message) -> Result<()>;
    /// Update the display name on file for a registered group's JID.
    /// No-op if the JID is not (yet) registered.
    async fn store_chat_metadata(&self, jid: &Jid, display_name: &str) -> Result<()>;

    async fn get_router_state(&self, key: &str) -> Result<Option<String>>;
    async fn set_router_state(&self, key: &str, value: &str) -> Result<()>;

    async fn get_task(&self, task_id: &str) -> Result<Option<ScheduledTask>>;
    async fn get_due_tasks(&self, now: &Timestamp) -> Result<Vec<ScheduledTask>>;
    async fn create_task(&self, task: &ScheduledTask) -> Result<()>;
    async fn update_task(&self, task: &ScheduledTask) -> Result<()>;
    async fn delete_task(&self, task_id: &str) -> Result<()>;
    async fn log_task_run(&self, log: &TaskRunLog) -> Result<()>;
}
