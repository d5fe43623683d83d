use serde::{Deserialize, Serialize};

/// Written by the host into `input/` to pipe a follow-up prompt into a
/// running sandbox (§4.1 "write text into its IPC inbox").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpInput {
    pub text: String,
}

/// A chat message the sandbox wants delivered through a channel, read from
/// `messages/` (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub chat_jid: String,
    pub text: String,
    #[serde(default)]
    pub parse_mode: Option<String>,
}

/// A schedule the sandbox is requesting, read from `tasks/` (§4.3, §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleRequest {
    Cron { expression: String, timezone: String },
    Interval { every_ms: i64 },
    Once { at: String },
}

/// A task-management request from the sandbox, read from `tasks/` (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskRequest {
    ScheduleTask {
        #[serde(default)]
        target_jid: Option<String>,
        prompt: String,
        schedule: ScheduleRequest,
        #[serde(default)]
        context_mode: Option<String>,
    },
    PauseTask {
        task_id: String,
    },
    ResumeTask {
        task_id: String,
    },
    CancelTask {
        task_id: String,
    },
    /// Only honored when the emitting group is the main group (§4.3, §9).
    RegisterGroup {
        jid: String,
        display_name: String,
        folder: String,
        requires_trigger: bool,
        trigger: String,
    },
}

/// A request to run an allowlisted external query, read from `queries/`
/// (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub uuid: String,
    #[serde(rename = "type")]
    pub query_type: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Ok,
    Error,
}

/// Written by the host into `responses/` to answer a query (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub uuid: String,
    pub status: QueryStatus,
    pub result: serde_json::Value,
}
