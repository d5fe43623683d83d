//! [`ProcessHandle`] implementation the Group Queue drives for a group's
//! Active Sandbox: follow-ups and the idle close go through the IPC Bridge's
//! `input/` directory (§4.3), forceful stop goes through the Sandbox
//! Runner's graceful-stop protocol (§4.2).

use std::sync::Arc;

use async_trait::async_trait;
use meshrelay_ipc::IpcBridge;
use meshrelay_queue::ProcessHandle;
use meshrelay_sandbox::{ActiveSandbox, SandboxRunner};
use tracing::warn;

pub struct SandboxProcessHandle {
    pub sandbox: Arc<ActiveSandbox>,
    pub runner: Arc<SandboxRunner>,
    pub ipc: Arc<IpcBridge>,
    pub folder: String,
}

#[async_trait]
impl ProcessHandle for SandboxProcessHandle {
    async fn write_follow_up(&self, text: &str) {
        if let Err(e) = self.ipc.write_follow_up(&self.folder, text).await {
            warn!(folder = %self.folder, error = %e, "failed to write follow-up to ipc inbox");
        }
    }

    async fn close_stdin(&self) {
        if let Err(e) = self.ipc.write_close_sentinel(&self.folder).await {
            warn!(folder = %self.folder, error = %e, "failed to write ipc close sentinel");
        }
    }

    async fn request_stop(&self) {
        if let Err(e) = self.runner.graceful_stop(&self.sandbox).await {
            warn!(folder = %self.folder, error = %e, "graceful stop failed");
        }
    }
}
