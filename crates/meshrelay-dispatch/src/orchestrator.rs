//! The Orchestrator: the one component that actually drives a sandbox
//! invocation end to end, and the sink IPC requests land on (§4.4 "Message
//! Loop" driving logic, §4.7 "Shared State & Command Effects", §9).
//!
//! It implements both [`GroupDispatch`] (the Group Queue's callback) and
//! [`IpcEventSink`] (the IPC Bridge's callback) because both need the same
//! set of collaborators — Store, SharedState, ChannelManager, SandboxRunner,
//! QueryAdapter, SchedulerEngine — and nothing is gained by splitting them
//! into two structs that would just hold the same `Arc`s twice.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use meshrelay_accumulator::Accumulator;
use meshrelay_channels::ChannelManager;
use meshrelay_core::{
    Config, ContextMode, Group, GroupFolder, Jid, RunOutcome as TaskRunOutcome, ScheduleKind, ScheduledTask, Timestamp,
};
use meshrelay_ipc::{IpcBridge, IpcEventSink, OutboundMessage, QueryRequest, ScheduleRequest, TaskRequest};
use meshrelay_query::QueryAdapter;
use meshrelay_queue::{GroupDispatch, GroupQueue, WorkItem};
use meshrelay_sandbox::{
    process_name, FrameEvent, MountSpec, SandboxError, SandboxFrame, SandboxInput, SandboxRunner, SpawnRequest,
};
use meshrelay_scheduler::SchedulerEngine;
use meshrelay_sessions::SharedState;
use meshrelay_store::Store;
use tracing::{info, instrument, warn};

use crate::commands::{build_catalog, CommandEffect, ModelCatalogEntry};
use crate::error::{DispatchError, Result};
use crate::mounts::build_mounts;
use crate::process_handle::SandboxProcessHandle;
use crate::prompt::scheduled_task_prompt;

pub struct Orchestrator {
    config: Config,
    store: Arc<dyn Store>,
    state: Arc<SharedState>,
    channels: Arc<ChannelManager>,
    ipc: Arc<IpcBridge>,
    sandbox_runner: Arc<SandboxRunner>,
    query_adapter: Arc<QueryAdapter>,
    scheduler: Arc<SchedulerEngine>,
    catalog: Vec<ModelCatalogEntry>,
    queue: OnceLock<Arc<GroupQueue>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        state: Arc<SharedState>,
        channels: Arc<ChannelManager>,
        ipc: Arc<IpcBridge>,
        sandbox_runner: Arc<SandboxRunner>,
        query_adapter: Arc<QueryAdapter>,
        scheduler: Arc<SchedulerEngine>,
    ) -> Arc<Self> {
        let catalog = build_catalog(&config);
        Arc::new(Self {
            config,
            store,
            state,
            channels,
            ipc,
            sandbox_runner,
            query_adapter,
            scheduler,
            catalog,
            queue: OnceLock::new(),
        })
    }

    /// Completes construction once the Group Queue (which needs this
    /// Orchestrator as its `Arc<dyn GroupDispatch>`) exists. Called exactly
    /// once, immediately after `GroupQueue::new`, before any traffic flows.
    pub fn set_queue(&self, queue: Arc<GroupQueue>) {
        if self.queue.set(queue).is_err() {
            warn!("orchestrator queue was already set, ignoring duplicate call");
        }
    }

    fn queue(&self) -> &Arc<GroupQueue> {
        self.queue.get().expect("Orchestrator::set_queue must run before any dispatch begins")
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    pub fn channels(&self) -> &Arc<ChannelManager> {
        &self.channels
    }

    pub fn ipc(&self) -> &Arc<IpcBridge> {
        &self.ipc
    }

    pub fn group_queue(&self) -> &Arc<GroupQueue> {
        self.queue()
    }

    pub fn catalog(&self) -> &[ModelCatalogEntry] {
        &self.catalog
    }

    /// Applies a parsed builtin command's effects (§4.7). The gateway's
    /// `/v1/commands` handler calls this after `commands::handle_command`.
    #[instrument(skip(self))]
    pub async fn apply_command_effect(&self, effect: CommandEffect) -> Result<()> {
        match effect {
            CommandEffect::KillContainer(jid) => {
                self.queue().kill_group(jid.as_str()).await;
            }
            CommandEffect::ClearSession(folder) => {
                self.state.clear_session(&folder).await?;
            }
            CommandEffect::SwitchModel { jid, model_id, runtime_id } => {
                if let Some(mut group) = self.state.get_group(&jid).await {
                    let folder = group.folder.clone();
                    group.model_override = Some(model_id);
                    group.runtime_override = Some(runtime_id);
                    self.state.upsert_group(group).await?;
                    self.state.clear_session(&folder).await?;
                }
            }
        }
        Ok(())
    }

    fn resolve_runtime<'a>(&'a self, group: &Group) -> Result<(String, &'a meshrelay_core::config::RuntimeConfig)> {
        if let Some(name) = &group.runtime_override {
            return self
                .config
                .runtime(name)
                .map(|rc| (name.clone(), rc))
                .ok_or_else(|| DispatchError::NoRuntime(name.clone()));
        }
        let mut names: Vec<&String> = self.config.runtimes.keys().collect();
        names.sort();
        let default_name = names.first().ok_or_else(|| DispatchError::NoRuntime("<none configured>".to_string()))?;
        let rc = self.config.runtimes.get(*default_name).expect("key from map iteration");
        Ok(((*default_name).clone(), rc))
    }

    fn gather_secrets(&self, required: &[String]) -> HashMap<String, String> {
        let mut secrets = HashMap::new();
        for name in required {
            match std::env::var(name) {
                Ok(value) => {
                    secrets.insert(name.clone(), value);
                }
                Err(_) => warn!(secret = %name, "required secret not set in process environment"),
            }
        }
        secrets
    }

    /// Drives one sandbox invocation end to end: spawn, stream frames into
    /// an Accumulator, finalize, and report back what happened (§4.2, §4.6).
    #[instrument(skip(self, prompt), fields(folder = %group.folder, jid = %group.jid))]
    async fn invoke_sandbox(
        &self,
        group: &Group,
        prompt: String,
        session_id: Option<String>,
        is_scheduled: bool,
    ) -> Result<InvocationOutcome> {
        let (runtime_name, runtime_config) = self.resolve_runtime(group)?;
        let model = group.model_override.clone().or_else(|| Some(runtime_config.default_model.clone()));
        let mounts: Vec<MountSpec> = build_mounts(&self.config, group.folder.as_str(), group.is_main, &runtime_name);
        let secrets = self.gather_secrets(&runtime_config.required_secrets);

        let input = SandboxInput {
            prompt,
            session_id,
            group_folder: group.folder.as_str().to_string(),
            chat_jid: group.jid.as_str().to_string(),
            is_main: group.is_main,
            is_scheduled,
            model,
            secrets,
        };
        let spawn_req = SpawnRequest {
            runtime_image: runtime_config.image.clone(),
            group_folder: group.folder.as_str().to_string(),
            mounts,
            input,
        };

        let epoch_ms = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0);
        let name = process_name(group.folder.as_str(), epoch_ms);

        let sandbox = self.sandbox_runner.spawn(&spawn_req, name, group.jid.as_str().to_string()).await?;

        let process_handle = Arc::new(SandboxProcessHandle {
            sandbox: sandbox.clone(),
            runner: self.sandbox_runner.clone(),
            ipc: self.ipc.clone(),
            folder: group.folder.as_str().to_string(),
        });
        self.queue().register_process(group.jid.as_str(), process_handle).await.ok();

        let channel = self
            .channels
            .owner_of(&group.jid)
            .ok_or_else(|| DispatchError::UnknownGroup(group.jid.as_str().to_string()))?;
        let accumulator = Accumulator::new(
            channel,
            group.jid.clone(),
            meshrelay_core::config::DEFAULT_MAX_TOOL_LINES,
            std::time::Duration::from_millis(meshrelay_core::config::DEFAULT_ACCUMULATOR_DEBOUNCE_MS),
        );
        let accumulated = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<SandboxFrame>();
        let on_frame: meshrelay_sandbox::FrameCallback = Box::new(move |frame| {
            let _ = tx.send(frame);
        });

        let feed_acc = accumulator.clone();
        let feed_flag = accumulated.clone();
        let feeder = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                match frame.event {
                    Some(FrameEvent::ToolStart { summary }) => {
                        feed_flag.store(true, std::sync::atomic::Ordering::SeqCst);
                        feed_acc.add_tool_start(summary).await;
                    }
                    Some(FrameEvent::TextDelta { text }) => {
                        feed_flag.store(true, std::sync::atomic::Ordering::SeqCst);
                        feed_acc.add_text_delta(text).await;
                    }
                    None => {}
                }
            }
        });

        let drive_result = self.sandbox_runner.drive(sandbox, on_frame).await;
        let _ = feeder.await;

        match drive_result {
            Ok(outcome) => {
                let frame = outcome.final_frame.expect("drive() only returns Ok with a final frame");
                let result_text = frame.result.clone().unwrap_or_default();
                accumulator.finalize(&result_text).await?;
                Ok(InvocationOutcome {
                    result_text,
                    new_session_id: frame.new_session_id,
                    model: frame.model,
                    errored: frame.error.is_some() || frame.status.as_deref() == Some("error"),
                })
            }
            Err(SandboxError::HardDeadlineExceeded) => {
                finalize_truncated(&accumulator, accumulated.as_ref(), "sandbox exceeded hard deadline").await
            }
            Err(SandboxError::ExitedWithoutResult(_)) => {
                finalize_truncated(&accumulator, accumulated.as_ref(), "sandbox exited without producing a result").await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Processes a group's pending message batch (§4.4, §4.2): loads the
    /// unprocessed messages since the group's cursor, runs one sandbox
    /// invocation, and persists the resulting session id / reported model /
    /// cursor.
    #[instrument(skip(self))]
    async fn process_group_messages(&self, jid: &str) -> Result<()> {
        let jid = Jid::from(jid);
        let group = self.state.get_group(&jid).await.ok_or_else(|| DispatchError::UnknownGroup(jid.as_str().to_string()))?;

        let since = self.state.last_agent_ts(&jid).await?.unwrap_or_else(|| Timestamp::from(""));
        let batch = self.store.get_messages_since(&jid, &since).await?;
        if batch.is_empty() {
            return Ok(());
        }
        let latest_ts = batch.last().expect("checked non-empty").timestamp.clone();
        let prompt = crate::prompt::format_messages(&batch);

        let session_id = self.state.get_session(&group.folder).await;
        let outcome = self.invoke_sandbox(&group, prompt, session_id, false).await?;

        if let Some(new_session) = outcome.new_session_id {
            self.state.set_session(&group.folder, new_session).await?;
        }
        if let Some(model) = outcome.model {
            self.state.set_reported_model(&group.folder, model).await;
        }
        self.state.set_last_agent_ts(&jid, latest_ts).await?;

        if outcome.errored {
            warn!(jid = %jid, "sandbox invocation reported an error result");
        }
        Ok(())
    }

    /// Runs one scheduled task's sandbox invocation against its target group
    /// (§4.5 step 2): the agent runs in the target group's workspace, using
    /// that group's session unless the task is isolated.
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    async fn run_scheduled_task(&self, task: ScheduledTask) -> Result<()> {
        let target_group = self
            .state
            .get_group(&task.target_jid)
            .await
            .ok_or_else(|| DispatchError::UnknownGroup(task.target_jid.as_str().to_string()))?;

        let session_id = match task.context_mode {
            ContextMode::Group => self.state.get_session(&target_group.folder).await,
            ContextMode::Isolated => None,
        };
        let prompt = scheduled_task_prompt(&task.prompt);
        let started_at = Timestamp::now();

        let run_result = self.invoke_sandbox(&target_group, prompt, session_id, true).await;

        let (outcome, summary) = match &run_result {
            Ok(o) if !o.errored => (TaskRunOutcome::Success, o.result_text.clone()),
            Ok(o) => (TaskRunOutcome::Error, o.result_text.clone()),
            Err(e) => (TaskRunOutcome::Error, e.to_string()),
        };

        if let Ok(ref o) = run_result {
            if matches!(task.context_mode, ContextMode::Group) {
                if let Some(new_session) = &o.new_session_id {
                    self.state.set_session(&target_group.folder, new_session.clone()).await?;
                }
            }
        }

        self.scheduler.record_completion(task, started_at, outcome, summary).await?;
        run_result.map(|_| ())
    }
}

struct InvocationOutcome {
    result_text: String,
    new_session_id: Option<String>,
    model: Option<String>,
    errored: bool,
}

/// Resolved Open Question #1 (synthetic truncation on a hard deadline or an
/// exit without a result): finalize with a truncation marker if any content
/// was ever accumulated, otherwise treat the whole invocation as failed.
async fn finalize_truncated(
    accumulator: &Arc<Accumulator>,
    accumulated: &std::sync::atomic::AtomicBool,
    reason: &str,
) -> Result<InvocationOutcome> {
    if accumulated.load(std::sync::atomic::Ordering::SeqCst) {
        let truncated = serde_json::json!({"status": "error", "error": reason}).to_string();
        accumulator.finalize(&truncated).await?;
        Ok(InvocationOutcome { result_text: truncated, new_session_id: None, model: None, errored: true })
    } else {
        Err(DispatchError::Core(meshrelay_core::CoreError::Internal(reason.to_string())))
    }
}

#[async_trait]
impl GroupDispatch for Orchestrator {
    async fn run(&self, jid: &str, item: WorkItem) -> meshrelay_queue::Result<()> {
        let result = match item {
            WorkItem::MessageCheck => self.process_group_messages(jid).await,
            WorkItem::Task(task) => self.run_scheduled_task(task).await,
        };
        result.map_err(|e| {
            warn!(jid, error = %e, "dispatch failed");
            meshrelay_queue::QueueError::Core(meshrelay_core::CoreError::Internal(e.to_string()))
        })
    }
}

#[async_trait]
impl IpcEventSink for Orchestrator {
    async fn on_message(&self, folder: &str, message: OutboundMessage) {
        let jid = Jid::from(message.chat_jid.as_str());
        if let Err(e) = self.channels.send(&jid, &message.text).await {
            warn!(folder, jid = %jid, error = %e, "failed to deliver ipc outbound message");
        }
    }

    async fn on_task(&self, folder: &str, task: TaskRequest) {
        if let Err(e) = self.handle_task_request(folder, task).await {
            warn!(folder, error = %e, "failed to handle ipc task request");
        }
    }

    async fn on_query(&self, folder: &str, query: QueryRequest) {
        let owner_group = match GroupFolder::new(folder) {
            Ok(gf) => self.state.group_by_folder(&gf).await,
            Err(_) => None,
        };
        let is_main = owner_group.as_ref().is_some_and(|g| g.is_main);
        let response = self.query_adapter.handle(&query, is_main).await;
        if let Err(e) = self.ipc.write_query_response(folder, &response).await {
            warn!(folder, error = %e, "failed to write ipc query response");
        }
    }
}

impl Orchestrator {
    async fn handle_task_request(&self, folder: &str, task: TaskRequest) -> Result<()> {
        let owner_folder = GroupFolder::new(folder).map_err(DispatchError::UnknownGroup)?;
        let owner_group = self
            .state
            .group_by_folder(&owner_folder)
            .await
            .ok_or_else(|| DispatchError::UnknownGroup(folder.to_string()))?;

        match task {
            TaskRequest::ScheduleTask { target_jid, prompt, schedule, context_mode } => {
                self.schedule_task(&owner_group, target_jid, prompt, schedule, context_mode).await
            }
            TaskRequest::PauseTask { task_id } => self.set_task_status(&task_id, meshrelay_core::TaskStatus::Paused).await,
            TaskRequest::ResumeTask { task_id } => self.set_task_status(&task_id, meshrelay_core::TaskStatus::Active).await,
            TaskRequest::CancelTask { task_id } => self.set_task_status(&task_id, meshrelay_core::TaskStatus::Cancelled).await,
            TaskRequest::RegisterGroup { jid, display_name, folder: new_folder, requires_trigger, trigger } => {
                if !owner_group.is_main {
                    warn!(folder, "register_group ignored: emitting group is not the main group");
                    return Ok(());
                }
                let group_folder = GroupFolder::new(new_folder).map_err(DispatchError::UnknownGroup)?;
                let group = Group {
                    jid: Jid::from(jid.as_str()),
                    display_name,
                    folder: group_folder,
                    runtime_override: None,
                    model_override: None,
                    requires_trigger,
                    trigger,
                    is_main: false,
                };
                self.state.upsert_group(group.clone()).await?;
                self.ipc.start_group(group.folder.as_str(), group.jid.as_str(), false, Vec::new()).await;
                Ok(())
            }
        }
    }

    /// Resolved Open Question #3: a `schedule_task` naming an unregistered
    /// `target_jid` is rejected outright — never auto-registers the target,
    /// never written to the Store.
    async fn schedule_task(
        &self,
        owner_group: &Group,
        target_jid: Option<String>,
        prompt: String,
        schedule: ScheduleRequest,
        context_mode: Option<String>,
    ) -> Result<()> {
        let target_jid = target_jid.map(|j| Jid::from(j.as_str())).unwrap_or_else(|| owner_group.jid.clone());

        if target_jid != owner_group.jid && !owner_group.is_main {
            warn!(folder = %owner_group.folder, target = %target_jid, "non-main group attempted to schedule a task against another group");
            return Ok(());
        }
        if self.state.get_group(&target_jid).await.is_none() {
            warn!(folder = %owner_group.folder, target = %target_jid, "rejecting schedule_task for an unregistered target jid");
            return Ok(());
        }

        let timezone = match &schedule {
            ScheduleRequest::Cron { timezone, .. } => timezone.clone(),
            _ => self.config.scheduler.timezone.clone(),
        };
        let schedule_kind = match schedule {
            ScheduleRequest::Cron { expression, .. } => ScheduleKind::Cron { expression },
            ScheduleRequest::Interval { every_ms } => ScheduleKind::Interval { ms: every_ms },
            ScheduleRequest::Once { at } => ScheduleKind::Once { at: Timestamp::from(at.as_str()) },
        };
        let next_run = meshrelay_scheduler::compute_next_run(&schedule_kind, chrono::Utc::now(), &timezone)?;

        let context_mode = match context_mode.as_deref() {
            Some("isolated") => ContextMode::Isolated,
            _ => ContextMode::Group,
        };

        let task = ScheduledTask {
            id: uuid::Uuid::new_v4().to_string(),
            owner_folder: owner_group.folder.clone(),
            target_jid,
            prompt,
            schedule: schedule_kind,
            status: meshrelay_core::TaskStatus::Active,
            next_run,
            context_mode,
        };
        self.store.create_task(&task).await?;
        info!(task_id = %task.id, target = %task.target_jid, "scheduled new task via ipc");
        Ok(())
    }

    async fn set_task_status(&self, task_id: &str, status: meshrelay_core::TaskStatus) -> Result<()> {
        let Some(mut task) = self.store.get_task(task_id).await? else {
            warn!(task_id, "task status change requested for unknown task id");
            return Ok(());
        };
        task.status = status;
        self.store.update_task(&task).await?;
        Ok(())
    }
}
