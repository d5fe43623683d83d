//! The Group Queue (§4.1): serializes work per group, caps global concurrent
//! sandboxes, prefers scheduled tasks over message batches, and retries
//! recoverable failures with exponential backoff.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use meshrelay_core::ScheduledTask;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

use crate::dispatch::{GroupDispatch, WorkItem};
use crate::error::{QueueError, Result};
use crate::process::ProcessHandle;

/// Exponential backoff base (§4.1): 5s, doubling, capped at 5 attempts.
pub const RETRY_BASE_SECS: u64 = 5;
pub const RETRY_MAX_ATTEMPTS: u32 = 5;

fn retry_delay(attempt: u32) -> Duration {
    Duration::from_secs(RETRY_BASE_SECS * 2u64.pow(attempt.saturating_sub(1)))
}

struct GroupState {
    pending_tasks: VecDeque<ScheduledTask>,
    message_check_pending: bool,
    running: bool,
    process: Option<Arc<dyn ProcessHandle>>,
    retry_count: u32,
}

impl GroupState {
    fn new() -> Self {
        Self {
            pending_tasks: VecDeque::new(),
            message_check_pending: false,
            running: false,
            process: None,
            retry_count: 0,
        }
    }

    fn next_item(&mut self) -> Option<WorkItem> {
        if let Some(task) = self.pending_tasks.pop_front() {
            return Some(WorkItem::Task(task));
        }
        if self.message_check_pending {
            self.message_check_pending = false;
            return Some(WorkItem::MessageCheck);
        }
        None
    }

    fn has_pending_work(&self) -> bool {
        !self.pending_tasks.is_empty() || self.message_check_pending
    }
}

struct Inner {
    groups: HashMap<String, GroupState>,
    active_count: usize,
    max_concurrent: usize,
    shutting_down: bool,
}

/// The Group Queue. One instance is shared for the whole process.
pub struct GroupQueue {
    inner: Arc<Mutex<Inner>>,
    dispatch: Arc<dyn GroupDispatch>,
    idle_notify: Arc<Notify>,
}

impl GroupQueue {
    pub fn new(max_concurrent: usize, dispatch: Arc<dyn GroupDispatch>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                groups: HashMap::new(),
                active_count: 0,
                max_concurrent,
                shutting_down: false,
            })),
            dispatch,
            idle_notify: Arc::new(Notify::new()),
        }
    }

    /// Sets the boolean message-check flag; if the group is idle and the
    /// global cap permits, promotes it to running (§4.1).
    pub async fn enqueue_message_check(&self, jid: &str) {
        let should_start = {
            let mut inner = self.inner.lock().await;
            if inner.shutting_down {
                return;
            }
            let state = inner.groups.entry(jid.to_string()).or_insert_with(GroupState::new);
            state.message_check_pending = true;
            try_activate(&mut inner, jid)
        };
        if should_start {
            self.spawn_worker(jid.to_string());
        }
    }

    /// Appends a task to the group's queue; tasks take priority over
    /// message-check work once the group is running (§4.1).
    pub async fn enqueue_task(&self, jid: &str, task: ScheduledTask) {
        let should_start = {
            let mut inner = self.inner.lock().await;
            if inner.shutting_down {
                return;
            }
            let state = inner.groups.entry(jid.to_string()).or_insert_with(GroupState::new);
            state.pending_tasks.push_back(task);
            try_activate(&mut inner, jid)
        };
        if should_start {
            self.spawn_worker(jid.to_string());
        }
    }

    /// If a sandbox is active for `jid`, writes `text` into its IPC inbox
    /// and returns `true` so the caller suppresses re-dispatch (§4.4c).
    pub async fn send_follow_up(&self, jid: &str, text: &str) -> bool {
        let process = {
            let inner = self.inner.lock().await;
            inner.groups.get(jid).and_then(|s| s.process.clone())
        };
        match process {
            Some(p) => {
                p.write_follow_up(text).await;
                true
            }
            None => false,
        }
    }

    /// Idle-timer trigger: writes the IPC close sentinel for the group's
    /// active sandbox, if any.
    pub async fn close_stdin(&self, jid: &str) {
        let process = {
            let inner = self.inner.lock().await;
            inner.groups.get(jid).and_then(|s| s.process.clone())
        };
        if let Some(p) = process {
            p.close_stdin().await;
        }
    }

    /// Forceful stop, used by `/reset` and model switch (§4.1).
    pub async fn kill_group(&self, jid: &str) {
        let process = {
            let inner = self.inner.lock().await;
            inner.groups.get(jid).and_then(|s| s.process.clone())
        };
        if let Some(p) = process {
            p.request_stop().await;
        }
    }

    /// Number of groups currently holding an Active Sandbox slot, for
    /// readiness reporting.
    pub async fn active_count(&self) -> usize {
        self.inner.lock().await.active_count
    }

    pub async fn is_active(&self, jid: &str) -> bool {
        self.inner
            .lock()
            .await
            .groups
            .get(jid)
            .map(|s| s.running)
            .unwrap_or(false)
    }

    /// Called by the Runner once a process has been spawned, so the Queue
    /// can tag and later reach it for follow-ups and kills (§4.1).
    pub async fn register_process(&self, jid: &str, process: Arc<dyn ProcessHandle>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let state = inner
            .groups
            .get_mut(jid)
            .ok_or_else(|| QueueError::UnknownGroup(jid.to_string()))?;
        state.process = Some(process);
        Ok(())
    }

    /// The sandbox tells the queue it reached an idle point, allowing a
    /// preemptive idle close (§4.1).
    pub async fn notify_idle(&self, jid: &str) {
        self.close_stdin(jid).await;
    }

    /// Stops accepting new work and waits up to `grace` for all Active
    /// Sandboxes to finish, then detaches without killing them (§4.1).
    pub async fn shutdown(&self, grace: Duration) {
        {
            let mut inner = self.inner.lock().await;
            inner.shutting_down = true;
        }
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let active = self.inner.lock().await.active_count;
            if active == 0 || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        info!("queue shutdown complete, detaching remaining sandboxes");
    }

    fn spawn_worker(&self, jid: String) {
        let inner = self.inner.clone();
        let dispatch = self.dispatch.clone();
        let idle_notify = self.idle_notify.clone();
        tokio::spawn(async move {
            worker_loop(inner, dispatch, jid, idle_notify).await;
        });
    }
}

/// Tries to move a group from pending to running. Returns `true` only when
/// the caller must spawn the worker task (i.e. the group was idle and is
/// newly promoted).
fn try_activate(inner: &mut Inner, jid: &str) -> bool {
    let state = inner.groups.get_mut(jid).expect("state just inserted");
    if state.running {
        return false;
    }
    if inner.active_count >= inner.max_concurrent {
        return false;
    }
    state.running = true;
    inner.active_count += 1;
    true
}

async fn worker_loop(
    inner: Arc<Mutex<Inner>>,
    dispatch: Arc<dyn GroupDispatch>,
    jid: String,
    idle_notify: Arc<Notify>,
) {
    loop {
        let item = {
            let mut guard = inner.lock().await;
            guard.groups.get_mut(&jid).and_then(|s| s.next_item())
        };

        let Some(item) = item else {
            let mut guard = inner.lock().await;
            if let Some(state) = guard.groups.get_mut(&jid) {
                if state.has_pending_work() {
                    continue;
                }
                state.running = false;
                state.process = None;
            }
            guard.active_count = guard.active_count.saturating_sub(1);
            drop(guard);
            idle_notify.notify_waiters();
            promote_next_waiting(&inner, &dispatch, &idle_notify).await;
            break;
        };

        debug!(jid = %jid, "dispatching work item");
        let result = dispatch.run(&jid, item.clone()).await;

        let mut guard = inner.lock().await;
        if let Some(state) = guard.groups.get_mut(&jid) {
            match result {
                Ok(()) => state.retry_count = 0,
                Err(e) => {
                    state.retry_count += 1;
                    if state.retry_count > RETRY_MAX_ATTEMPTS {
                        error!(jid = %jid, error = %e, "group exceeded retry cap, dropping batch");
                        state.pending_tasks.clear();
                        state.message_check_pending = false;
                        state.retry_count = 0;
                    } else {
                        // Re-stage the failed item so the retry actually
                        // re-dispatches it instead of falling through to
                        // whatever next_item() yields next (§4.1 backoff).
                        match item {
                            WorkItem::Task(task) => state.pending_tasks.push_front(task),
                            WorkItem::MessageCheck => state.message_check_pending = true,
                        }
                        let delay = retry_delay(state.retry_count);
                        warn!(jid = %jid, attempt = state.retry_count, delay_secs = delay.as_secs(), error = %e, "retrying after backoff");
                        drop(guard);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                }
            }
        }
    }
}

/// Since the global cap is checked at enqueue time, a group release may
/// free a slot for some other group whose enqueue call never got to run
/// (it observed the cap as full). We scan for one such group here.
async fn promote_next_waiting(inner: &Arc<Mutex<Inner>>, dispatch: &Arc<dyn GroupDispatch>, idle_notify: &Arc<Notify>) {
    let promoted = {
        let mut guard = inner.lock().await;
        if guard.shutting_down || guard.active_count >= guard.max_concurrent {
            None
        } else {
            guard
                .groups
                .iter()
                .find(|(_, s)| !s.running && s.has_pending_work())
                .map(|(jid, _)| jid.clone())
        }
    };

    if let Some(jid) = promoted {
        let should_start = {
            let mut guard = inner.lock().await;
            try_activate(&mut guard, &jid)
        };
        if should_start {
            let inner = inner.clone();
            let dispatch = dispatch.clone();
            let idle_notify = idle_notify.clone();
            tokio::spawn(async move {
                worker_loop(inner, dispatch, jid, idle_notify).await;
            });
        }
    }
}
