//! The narrow surface the Queue needs onto a live sandbox process, so this
//! crate never depends on `meshrelay-sandbox` directly — the Runner's
//! `ActiveSandbox` is wired in by whichever crate owns both (§3 "the Queue
//! uniquely owns Active Sandboxes; the Sandbox Runner borrows the handle").

use async_trait::async_trait;

#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Pipes a follow-up prompt into the process's IPC `input/` directory
    /// (§4.3).
    async fn write_follow_up(&self, text: &str);

    /// Writes the IPC close sentinel — requests graceful exit after
    /// draining (§4.2's idle-timer action).
    async fn close_stdin(&self);

    /// Forceful stop, used by `kill_group` (§4.1) and `/reset`.
    async fn request_stop(&self);
}
