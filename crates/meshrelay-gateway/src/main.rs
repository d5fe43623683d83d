//! The gateway binary: loads configuration, wires every subsystem crate
//! together (Store, SharedState, ChannelManager, IPC Bridge, Group Queue,
//! Sandbox Runner, Scheduler, Query Adapter, Orchestrator), runs orphan
//! cleanup, starts the background loops, and serves the HTTP surface (§6).

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use meshrelay_core::Config;
use meshrelay_dispatch::{MessageLoop, Orchestrator};
use meshrelay_ipc::{IpcBridge, IpcEventSink, OutboundMessage, QueryRequest, TaskRequest};
use meshrelay_query::QueryAdapter;
use meshrelay_queue::{GroupDispatch, GroupQueue, WorkItem};
use meshrelay_scheduler::SchedulerEngine;
use meshrelay_sessions::SharedState;
use meshrelay_store::{SqliteStore, Store};
use tracing::{info, warn};

mod app;
mod error;
mod http;

/// Forwards IPC events to the Orchestrator once it exists.
///
/// [`IpcBridge::new`] needs a sink at construction time, but the
/// Orchestrator it forwards to needs the already-built `IpcBridge` as one
/// of its own collaborators. This indirection breaks the cycle the same
/// way `Orchestrator::set_queue` breaks the Orchestrator/GroupQueue cycle:
/// build the bridge against a deferred handle, build the Orchestrator
/// against the real bridge, then fill the handle in before any traffic
/// flows.
#[derive(Default)]
struct DeferredSink {
    target: OnceLock<Arc<Orchestrator>>,
}

impl DeferredSink {
    fn set(&self, orchestrator: Arc<Orchestrator>) {
        if self.target.set(orchestrator).is_err() {
            warn!("deferred ipc sink target was already set, ignoring duplicate call");
        }
    }

    fn get(&self) -> &Arc<Orchestrator> {
        self.target
            .get()
            .expect("DeferredSink::set must run before any ipc traffic is driven")
    }
}

#[async_trait]
impl IpcEventSink for DeferredSink {
    async fn on_message(&self, folder: &str, message: OutboundMessage) {
        self.get().on_message(folder, message).await;
    }

    async fn on_task(&self, folder: &str, task: TaskRequest) {
        self.get().on_task(folder, task).await;
    }

    async fn on_query(&self, folder: &str, query: QueryRequest) {
        self.get().on_query(folder, query).await;
    }
}

/// Forwards Group Queue dispatch calls to the Orchestrator once it exists.
///
/// `GroupQueue::new` needs its `Arc<dyn GroupDispatch>` at construction, the
/// `SchedulerEngine` needs the already-built `GroupQueue`, and the
/// Orchestrator needs the already-built `SchedulerEngine` — so the
/// Orchestrator (which implements `GroupDispatch`) cannot exist yet when
/// the queue is built. Same deferred-handle trick as [`DeferredSink`].
#[derive(Default)]
struct DeferredDispatch {
    target: OnceLock<Arc<Orchestrator>>,
}

impl DeferredDispatch {
    fn set(&self, orchestrator: Arc<Orchestrator>) {
        if self.target.set(orchestrator).is_err() {
            warn!("deferred dispatch target was already set, ignoring duplicate call");
        }
    }
}

#[async_trait]
impl GroupDispatch for DeferredDispatch {
    async fn run(&self, jid: &str, item: WorkItem) -> meshrelay_queue::Result<()> {
        let orchestrator = self
            .target
            .get()
            .expect("DeferredDispatch::set must run before any queue work is dispatched");
        orchestrator.run(jid, item).await
    }
}

/// Orphan cleanup on startup (§4.2): terminate any `agent-`-prefixed
/// process left running by a prior, uncleanly-stopped instance.
fn cleanup_orphans() {
    for name in meshrelay_sandbox::scan_orphans() {
        info!(process = %name, "terminating orphaned sandbox process from a prior run");
        if let Err(e) = std::process::Command::new("pkill").arg("-f").arg(&name).status() {
            warn!(process = %name, error = %e, "failed to invoke pkill for orphan cleanup");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meshrelay_gateway=info,tower_http=debug".into()),
        )
        .init();

    let config_path = std::env::var("MESHRELAY_CONFIG").ok();
    let config = Config::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({e}), falling back to defaults");
        Config::default()
    });

    cleanup_orphans();

    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&config.store.dsn)?);
    let state = Arc::new(SharedState::new(store.clone()));
    state.reload().await?;

    let channels = Arc::new(meshrelay_channels::ChannelManager::new());
    let mut ingest_tasks = Vec::new();

    if let Some(tg) = &config.channels.telegram {
        let tg_config = meshrelay_telegram::TelegramConfig {
            bot_token: tg.bot_token.clone(),
            allow_users: tg.allow_users.clone(),
            dm_allowed: tg.dm_allowed,
            require_mention: tg.require_mention,
            assistant_name: tg.assistant_name.clone(),
        };
        let adapter = Arc::new(meshrelay_telegram::TelegramAdapter::new(tg_config.clone()));
        channels.register(adapter.clone());
        let bot = adapter.bot();
        let store_for_ingest = store.clone();
        ingest_tasks.push(tokio::spawn(async move {
            meshrelay_telegram::ingest::run(bot, store_for_ingest, tg_config).await;
        }));
        info!("telegram adapter registered");
    }

    let mut whatsapp_router = None;
    if let Some(wa) = &config.channels.whatsapp {
        let wa_config = meshrelay_whatsapp::WhatsAppConfig {
            access_token: wa.access_token.clone(),
            phone_number_id: wa.phone_number_id.clone(),
            app_secret: wa.app_secret.clone(),
            verify_token: wa.verify_token.clone(),
        };
        channels.register(Arc::new(meshrelay_whatsapp::WhatsAppAdapter::new(wa_config.clone())));
        let webhook_state = meshrelay_whatsapp::webhook::WebhookState { store: store.clone(), config: wa_config };
        whatsapp_router = Some(
            axum::Router::new()
                .route(
                    "/webhooks/whatsapp",
                    axum::routing::get(meshrelay_whatsapp::webhook::verify)
                        .post(meshrelay_whatsapp::webhook::receive),
                )
                .with_state(webhook_state),
        );
        info!("whatsapp adapter registered, webhook mounted at /webhooks/whatsapp");
    }

    let ipc_sink = Arc::new(DeferredSink::default());
    let ipc = Arc::new(IpcBridge::new(
        config.data_root.join("ipc"),
        Duration::from_millis(config.ipc.poll_interval_ms),
        ipc_sink.clone() as Arc<dyn IpcEventSink>,
    ));

    let sandbox_runner = Arc::new(meshrelay_sandbox::SandboxRunner::new(
        Duration::from_millis(config.orchestrator.idle_timeout_ms),
        Duration::from_millis(config.orchestrator.hard_deadline_ms),
        Duration::from_millis(meshrelay_core::config::GRACEFUL_STOP_GRACE_MS),
    ));

    let query_adapter = Arc::new(QueryAdapter::new(config.query_adapter.clone()));

    let dispatch_sink = Arc::new(DeferredDispatch::default());
    let queue = Arc::new(GroupQueue::new(
        config.orchestrator.max_concurrent_sandboxes,
        dispatch_sink.clone() as Arc<dyn GroupDispatch>,
    ));

    let scheduler = Arc::new(SchedulerEngine::new(
        store.clone(),
        queue.clone(),
        Duration::from_millis(config.scheduler.poll_interval_ms),
        config.scheduler.timezone.clone(),
    ));

    let orchestrator = Orchestrator::new(
        config.clone(),
        store.clone(),
        state.clone(),
        channels.clone(),
        ipc.clone(),
        sandbox_runner.clone(),
        query_adapter.clone(),
        scheduler.clone(),
    );
    ipc_sink.set(orchestrator.clone());
    dispatch_sink.set(orchestrator.clone());
    orchestrator.set_queue(queue.clone());

    for group in state.all_groups().await {
        ipc.start_group(group.folder.as_str(), group.jid.as_str(), group.is_main, Vec::new()).await;
    }

    let message_loop = MessageLoop::new(
        store.clone(),
        state.clone(),
        queue.clone(),
        Duration::from_millis(config.orchestrator.poll_interval_ms),
    );
    message_loop.startup_recovery().await?;

    let shutdown = Arc::new(tokio::sync::Notify::new());

    let message_loop_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { message_loop.run(shutdown).await })
    };
    let scheduler_handle = {
        let scheduler = scheduler.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { scheduler.run(shutdown).await })
    };

    let app_state = Arc::new(app::AppState { orchestrator: orchestrator.clone() });
    let mut router = app::build_router(app_state);
    if let Some(wa_router) = whatsapp_router {
        router = router.merge(wa_router);
    }

    let addr = config.bind_address;
    info!(%addr, "meshrelay gateway listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, router).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    });

    if let Err(e) = server.await {
        warn!(error = %e, "http server exited with error");
    }

    shutdown.notify_waiters();
    queue.shutdown(Duration::from_millis(config.orchestrator.hard_deadline_ms)).await;
    let _ = message_loop_handle.await;
    let _ = scheduler_handle.await;
    for task in ingest_tasks {
        task.abort();
    }

    Ok(())
}
