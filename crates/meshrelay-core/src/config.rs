use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Default HTTP bind address for the gateway's `/v1/*` surface (§6).
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8099";
/// Message Loop poll period (§4.4), milliseconds.
pub const DEFAULT_ORCHESTRATOR_POLL_INTERVAL_MS: u64 = 1_500;
/// Idle timer default (§4.2) — no activity resets the deadline until this fires.
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 120_000;
/// Hard deadline default (§4.2), from spawn.
pub const DEFAULT_HARD_DEADLINE_MS: u64 = 600_000;
/// Graceful-stop grace window after a stop request (§4.2).
pub const GRACEFUL_STOP_GRACE_MS: u64 = 15_000;
/// Scheduler poll period (§4.5), milliseconds.
pub const DEFAULT_SCHEDULER_POLL_INTERVAL_MS: u64 = 10_000;
/// IPC watcher poll period (§4.3), milliseconds.
pub const DEFAULT_IPC_POLL_INTERVAL_MS: u64 = 500;
/// Stream Accumulator debounce window (§4.6), milliseconds.
pub const DEFAULT_ACCUMULATOR_DEBOUNCE_MS: u64 = 500;
/// Stream Accumulator tool-start capture cap (§4.6).
pub const DEFAULT_MAX_TOOL_LINES: usize = 20;
/// Group Queue retry base delay (§4.1), seconds; doubles each attempt.
pub const RETRY_BASE_SECS: u64 = 5;
/// Group Queue retry attempt cap (§4.1).
pub const RETRY_MAX_ATTEMPTS: u32 = 5;

/// Top-level configuration, loaded from a TOML file with `MESHRELAY_*`
/// environment overrides. Mirrors §6's configuration option list directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,
    /// Location the channel-adapter process calls back into (§6 HTTP surface).
    pub callback_url: Option<String>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    #[serde(default)]
    pub runtimes: HashMap<String, RuntimeConfig>,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub ipc: IpcConfig,
    pub mount_allowlist_path: Option<PathBuf>,
    #[serde(default)]
    pub blocked_mount_prefixes: Vec<String>,
    #[serde(default)]
    pub query_adapter: QueryAdapterConfig,
    /// Channel-adapter wiring config. The core treats channels as
    /// collaborators behind the `Channel` capability (§6) — these sections
    /// only carry what the gateway binary needs to construct and register
    /// an adapter at startup, nothing the dispatch/queue/ipc crates read.
    #[serde(default)]
    pub channels: ChannelsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    pub telegram: Option<TelegramSection>,
    pub whatsapp: Option<WhatsAppSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramSection {
    pub bot_token: String,
    #[serde(default)]
    pub allow_users: Vec<String>,
    #[serde(default)]
    pub dm_allowed: bool,
    #[serde(default)]
    pub require_mention: bool,
    #[serde(default = "default_assistant_name")]
    pub assistant_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppSection {
    pub access_token: String,
    pub phone_number_id: String,
    pub app_secret: String,
    pub verify_token: String,
}

fn default_assistant_name() -> String {
    "Assistant".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_dsn")]
    pub dsn: String,
    #[serde(default = "default_groups_dir")]
    pub groups_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dsn: default_store_dsn(),
            groups_dir: default_groups_dir(),
        }
    }
}

/// One configured sandbox image, keyed by runtime name (`claude`, `gemini`,
/// `codex`, …) in the enclosing map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub image: String,
    pub default_model: String,
    #[serde(default)]
    pub required_secrets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_concurrent_sandboxes")]
    pub max_concurrent_sandboxes: usize,
    #[serde(default = "default_orchestrator_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(default = "default_hard_deadline_ms")]
    pub hard_deadline_ms: u64,
    #[serde(default = "default_main_group_folder")]
    pub main_group_folder: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sandboxes: default_max_concurrent_sandboxes(),
            poll_interval_ms: default_orchestrator_poll_interval_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            hard_deadline_ms: default_hard_deadline_ms(),
            main_group_folder: default_main_group_folder(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_scheduler_poll_interval_ms(),
            timezone: default_timezone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcConfig {
    #[serde(default = "default_ipc_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_ipc_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueryAdapterConfig {
    #[serde(default)]
    pub read_allowlist: Vec<QueryTypeConfig>,
    #[serde(default)]
    pub write_allowlist: Vec<QueryTypeConfig>,
    #[serde(default = "bool_true")]
    pub require_main_group_for_writes: bool,
}

/// A single allowlisted query/command type for the External Query Adapter
/// (§4.8): maps a sandbox-facing `type` string to a fixed argv.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryTypeConfig {
    pub query_type: String,
    pub binary: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_query_timeout_ms")]
    pub timeout_ms: u64,
}

fn bool_true() -> bool {
    true
}
fn default_bind_address() -> SocketAddr {
    DEFAULT_BIND_ADDRESS.parse().expect("valid default bind address")
}
fn default_data_root() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".meshrelay")
}
fn default_store_dsn() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.meshrelay/meshrelay.db")
}
fn default_groups_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".meshrelay/groups")
}
fn default_max_concurrent_sandboxes() -> usize {
    4
}
fn default_orchestrator_poll_interval_ms() -> u64 {
    DEFAULT_ORCHESTRATOR_POLL_INTERVAL_MS
}
fn default_idle_timeout_ms() -> u64 {
    DEFAULT_IDLE_TIMEOUT_MS
}
fn default_hard_deadline_ms() -> u64 {
    DEFAULT_HARD_DEADLINE_MS
}
fn default_main_group_folder() -> String {
    "main".to_string()
}
fn default_scheduler_poll_interval_ms() -> u64 {
    DEFAULT_SCHEDULER_POLL_INTERVAL_MS
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_ipc_poll_interval_ms() -> u64 {
    DEFAULT_IPC_POLL_INTERVAL_MS
}
fn default_query_timeout_ms() -> u64 {
    10_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            callback_url: None,
            store: StoreConfig::default(),
            data_root: default_data_root(),
            runtimes: HashMap::new(),
            orchestrator: OrchestratorConfig::default(),
            scheduler: SchedulerConfig::default(),
            ipc: IpcConfig::default(),
            mount_allowlist_path: None,
            blocked_mount_prefixes: Vec::new(),
            query_adapter: QueryAdapterConfig::default(),
            channels: ChannelsConfig::default(),
        }
    }
}

impl Config {
    /// Load config from a TOML file with `MESHRELAY_*` env var overrides.
    ///
    /// Checks, in order: the explicit path argument, then
    /// `~/.meshrelay/meshrelay.toml`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: Config = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("MESHRELAY_").split("_"))
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Resolve the `RuntimeConfig` for `name`, if configured.
    pub fn runtime(&self, name: &str) -> Option<&RuntimeConfig> {
        self.runtimes.get(name)
    }

    /// Filesystem root for the IPC namespace of `folder` (§4.3, §6).
    pub fn ipc_dir(&self, folder: &str) -> PathBuf {
        self.data_root.join("ipc").join(folder)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.meshrelay/meshrelay.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_timers() {
        let cfg = Config::default();
        assert_eq!(cfg.orchestrator.max_concurrent_sandboxes, 4);
        assert_eq!(cfg.scheduler.timezone, "UTC");
        assert!(cfg.ipc.poll_interval_ms > 0);
    }

    #[test]
    fn ipc_dir_is_rooted_at_data_root() {
        let mut cfg = Config::default();
        cfg.data_root = PathBuf::from("/tmp/meshrelay-test");
        assert_eq!(
            cfg.ipc_dir("acme"),
            PathBuf::from("/tmp/meshrelay-test/ipc/acme")
        );
    }
}
