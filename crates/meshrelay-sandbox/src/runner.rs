//! The Sandbox Runner: spawns one subprocess per invocation, streams its
//! output through [`crate::frame::FrameParser`], and enforces the idle and
//! hard-deadline timers (§4.2).

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Result, SandboxError};
use crate::frame::{FrameEvent as RawFrameEvent, FrameParser, END_SENTINEL, START_SENTINEL};
use crate::types::{SandboxFrame, SpawnRequest};

/// Process-name prefix used for both the deterministic per-invocation name
/// and orphan cleanup on startup (§4.2).
pub const PROCESS_NAME_PREFIX: &str = "agent-";

/// Builds the deterministic process name `agent-{folder}-{epoch_ms}` used
/// for later stop and log correlation (§4.2).
pub fn process_name(group_folder: &str, epoch_ms: u64) -> String {
    format!("{PROCESS_NAME_PREFIX}{group_folder}-{epoch_ms}")
}

/// A live, spawned sandbox. Owned exclusively by the Group Queue; the
/// Runner only borrows it for reads/writes (§3 "Ownership & lifecycle").
pub struct ActiveSandbox {
    pub name: String,
    pub jid: String,
    child: Mutex<Child>,
    stdin: Mutex<Option<tokio::process::ChildStdin>>,
    pub spawned_at: Instant,
    stop_requested: AtomicBool,
}

impl ActiveSandbox {
    /// Writes a follow-up prompt line to the running sandbox's stdin, used
    /// by the IPC Bridge's `input/` pipe-through (§4.3).
    pub async fn write_line(&self, line: &str) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        if let Some(stdin) = guard.as_mut() {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await?;
        }
        Ok(())
    }

    /// Closes stdin, signaling the sandbox to exit after draining (the idle
    /// timer's close-sentinel action, §4.2).
    pub async fn close_stdin(&self) {
        let mut guard = self.stdin.lock().await;
        guard.take();
    }

    pub fn mark_stop_requested(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    async fn try_wait_exited(&self) -> bool {
        let mut guard = self.child.lock().await;
        matches!(guard.try_wait(), Ok(Some(_)))
    }

    async fn kill(&self) -> Result<()> {
        let mut guard = self.child.lock().await;
        guard.start_kill()?;
        Ok(())
    }
}

/// Outcome handed back to the caller (the Queue's dispatch callback) once a
/// sandbox invocation has produced a final frame or otherwise stopped.
#[derive(Debug)]
pub struct RunOutcome {
    pub final_frame: Option<SandboxFrame>,
    pub exit_status: Option<i32>,
}

/// Invoked once per decoded frame, in arrival order, with exclusive access
/// to route events to the Accumulator/Store (§4.2's frame callback).
pub type FrameCallback = Box<dyn FnMut(SandboxFrame) + Send>;

pub struct SandboxRunner {
    idle_timeout: Duration,
    hard_deadline: Duration,
    graceful_grace: Duration,
}

impl SandboxRunner {
    pub fn new(idle_timeout: Duration, hard_deadline: Duration, graceful_grace: Duration) -> Self {
        Self {
            idle_timeout,
            hard_deadline,
            graceful_grace,
        }
    }

    /// Renders a spawn request into an actual `tokio::process::Command`.
    /// Mount flags are design-level (§4.2): callers running under a real
    /// container runtime translate [`crate::types::MountSpec`] into that
    /// runtime's bind-mount syntax; this function assumes `req.runtime_image`
    /// is itself the executable (or wrapper script) to invoke.
    fn build_command(req: &SpawnRequest, name: &str) -> Command {
        let mut cmd = Command::new(&req.runtime_image);
        cmd.arg("--name").arg(name);
        for mount in &req.mounts {
            let flag = if mount.read_only { "--mount-ro" } else { "--mount-rw" };
            cmd.arg(flag).arg(format!(
                "{}:{}",
                mount.host_path.display(),
                mount.guest_path.display()
            ));
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Spawns the process and writes the stdin document (§4.2 "Input").
    /// Returns the [`ActiveSandbox`] handle for the Queue to register.
    pub async fn spawn(&self, req: &SpawnRequest, name: String, jid: String) -> Result<Arc<ActiveSandbox>> {
        let mut cmd = Self::build_command(req, &name);
        let mut child = cmd.spawn().map_err(|e| SandboxError::SpawnFailed(e.to_string()))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::SpawnFailed("no stdin handle".into()))?;
        let payload = serde_json::to_vec(&req.input)
            .map_err(|e| SandboxError::SpawnFailed(format!("encoding stdin document: {e}")))?;
        stdin.write_all(&payload).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;

        info!(sandbox = %name, jid = %jid, "spawned sandbox");

        Ok(Arc::new(ActiveSandbox {
            name,
            jid,
            child: Mutex::new(child),
            stdin: Mutex::new(Some(stdin)),
            spawned_at: Instant::now(),
            stop_requested: AtomicBool::new(false),
        }))
    }

    /// Drives one sandbox to completion: streams stdout through the frame
    /// parser, invokes `on_frame` for each decoded record, and enforces the
    /// idle/hard-deadline timers. Returns once the process exits or is
    /// forcibly terminated.
    pub async fn drive(&self, sandbox: Arc<ActiveSandbox>, mut on_frame: FrameCallback) -> Result<RunOutcome> {
        let stdout = {
            let mut guard = sandbox.child.lock().await;
            guard
                .stdout
                .take()
                .ok_or_else(|| SandboxError::SpawnFailed("no stdout handle".into()))?
        };
        let mut lines = BufReader::new(stdout).lines();
        let mut parser = FrameParser::new();

        let deadline_at = sandbox.spawned_at + self.hard_deadline;
        let mut idle_at = Instant::now() + self.idle_timeout;
        let mut final_frame = None;
        let mut graceful_stop_sent = false;

        loop {
            let now = Instant::now();
            if now >= deadline_at {
                warn!(sandbox = %sandbox.name, "hard deadline exceeded, forcing termination");
                sandbox.close_stdin().await;
                tokio::time::sleep(self.graceful_grace.min(Duration::from_millis(500))).await;
                let _ = sandbox.kill().await;
                return Err(SandboxError::HardDeadlineExceeded);
            }

            tokio::select! {
                line = lines.next_line() => {
                    match line? {
                        Some(raw) => {
                            debug!(sandbox = %sandbox.name, line = %raw, "sandbox stdout");
                            if let Some(event) = parser.feed_line(&raw) {
                                match event {
                                    RawFrameEvent::Frame(frame) => {
                                        if frame.is_meaningful() {
                                            idle_at = Instant::now() + self.idle_timeout;
                                        }
                                        let done = frame.is_final();
                                        on_frame(frame.clone());
                                        if done {
                                            final_frame = Some(frame);
                                        }
                                    }
                                    RawFrameEvent::ParseError { first } => {
                                        if first {
                                            warn!(sandbox = %sandbox.name, "discarding malformed frame");
                                        }
                                    }
                                }
                            }
                        }
                        None => break,
                    }
                }
                _ = tokio::time::sleep_until(idle_at), if !graceful_stop_sent => {
                    info!(sandbox = %sandbox.name, "idle timeout, closing stdin");
                    sandbox.close_stdin().await;
                    graceful_stop_sent = true;
                    idle_at = Instant::now() + self.graceful_grace;
                }
                _ = tokio::time::sleep_until(idle_at), if graceful_stop_sent => {
                    warn!(sandbox = %sandbox.name, "no exit after idle close, forcing kill");
                    let _ = sandbox.kill().await;
                    break;
                }
            }

            if sandbox.stop_requested() && !graceful_stop_sent {
                sandbox.close_stdin().await;
                graceful_stop_sent = true;
                idle_at = Instant::now() + self.graceful_grace;
            }
        }

        let exit_status = {
            let mut guard = sandbox.child.lock().await;
            match guard.wait().await {
                Ok(status) => status.code(),
                Err(_) => None,
            }
        };

        if final_frame.is_none() {
            let code = exit_status.unwrap_or(-1);
            return Err(SandboxError::ExitedWithoutResult(code));
        }

        Ok(RunOutcome { final_frame, exit_status })
    }

    /// Runs the full graceful-stop protocol (§4.2): request stop, close
    /// stdin, wait for the grace window, then force kill.
    pub async fn graceful_stop(&self, sandbox: &ActiveSandbox) -> Result<()> {
        sandbox.mark_stop_requested();
        sandbox.close_stdin().await;

        let deadline = Instant::now() + self.graceful_grace;
        while Instant::now() < deadline {
            if sandbox.try_wait_exited().await {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        sandbox.kill().await
    }
}

/// Scans for leftover `agent-`-prefixed processes from a prior run and
/// returns their names, for the caller to terminate (§4.2 "Orphan cleanup").
/// Implemented via `/proc` scanning on Linux; on platforms without `/proc`
/// this returns an empty list rather than failing startup.
pub fn scan_orphans() -> Vec<String> {
    let mut names = Vec::new();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return names;
    };
    for entry in entries.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
            continue;
        };
        let cmdline_path = format!("/proc/{pid}/cmdline");
        if let Ok(cmdline) = std::fs::read(&cmdline_path) {
            let joined = String::from_utf8_lossy(&cmdline).replace('\0', " ");
            if let Some(idx) = joined.find(PROCESS_NAME_PREFIX) {
                let candidate = &joined[idx..];
                let name: String = candidate
                    .split_whitespace()
                    .next()
                    .unwrap_or_default()
                    .to_string();
                if !name.is_empty() {
                    names.push(name);
                }
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_name_is_deterministic_per_call() {
        let name = process_name("main", 1700000000000);
        assert_eq!(name, "agent-main-1700000000000");
        assert!(name.starts_with(PROCESS_NAME_PREFIX));
    }

    #[test]
    fn frame_sentinels_are_reexported_for_callers() {
        assert_eq!(START_SENTINEL, "---OUTPUT_START---");
        assert_eq!(END_SENTINEL, "---OUTPUT_END---");
    }
}
