use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque chat identifier scoped by channel, e.g. `tg:123456`, `wa:1555…`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Jid(pub String);

impl Jid {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Jid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Jid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Sanitized filesystem folder name. Doubles as the group's identity in the
/// queue and as the IPC/mount namespace segment, so construction validates
/// the path is safe (no `..`, no separators, non-empty).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupFolder(pub String);

impl GroupFolder {
    /// Validates the candidate folder name. Rejects empty strings, path
    /// separators, and parent-directory segments — mirrors the mount
    /// allowlist's own path-safety checks (see meshrelay-sandbox).
    pub fn new(name: impl Into<String>) -> Result<Self, String> {
        let name = name.into();
        if name.is_empty() {
            return Err("folder name must not be empty".into());
        }
        if name == "." || name == ".." {
            return Err(format!("folder name {name:?} is not a valid identity"));
        }
        if name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(format!("folder name {name:?} contains path separators"));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupFolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ISO-8601 UTC timestamp string. Total order for the system is the
/// lexicographic order of these strings (see §3 Cursor).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub String);

impl Timestamp {
    pub fn now() -> Self {
        Self(chrono::Utc::now().to_rfc3339())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Timestamp {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A registered chat. JID and folder are both primary keys (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub jid: Jid,
    pub display_name: String,
    pub folder: GroupFolder,
    pub runtime_override: Option<String>,
    pub model_override: Option<String>,
    pub requires_trigger: bool,
    pub trigger: String,
    pub is_main: bool,
}

impl Group {
    pub fn new_main(jid: Jid, display_name: impl Into<String>, folder: GroupFolder) -> Self {
        Self {
            jid,
            display_name: display_name.into(),
            folder,
            runtime_override: None,
            model_override: None,
            requires_trigger: false,
            trigger: String::new(),
            is_main: true,
        }
    }
}

/// An inbound (or assistant-authored) chat message. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub jid: Jid,
    pub sender_id: String,
    pub sender_display_name: Option<String>,
    pub timestamp: Timestamp,
    pub body: String,
    pub is_from_assistant: bool,
}

/// Schedule kind for a Scheduled Task (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleKind {
    Cron { expression: String },
    Interval { ms: i64 },
    Once { at: Timestamp },
}

impl fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleKind::Cron { expression } => write!(f, "cron({expression})"),
            ScheduleKind::Interval { ms } => write!(f, "interval({ms}ms)"),
            ScheduleKind::Once { at } => write!(f, "once({at})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Active => "active",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(TaskStatus::Active),
            "paused" => Ok(TaskStatus::Paused),
            "completed" => Ok(TaskStatus::Completed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Whether a scheduled task's sandbox invocation reuses the group's session
/// or runs with no session id (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    Group,
    Isolated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    pub owner_folder: GroupFolder,
    pub target_jid: Jid,
    pub prompt: String,
    pub schedule: ScheduleKind,
    pub status: TaskStatus,
    pub next_run: Option<Timestamp>,
    pub context_mode: ContextMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRunLog {
    pub task_id: String,
    pub started_at: Timestamp,
    pub ended_at: Timestamp,
    pub outcome: RunOutcome,
    pub result_summary: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_folder_rejects_traversal() {
        assert!(GroupFolder::new("../etc").is_err());
        assert!(GroupFolder::new("a/b").is_err());
        assert!(GroupFolder::new("").is_err());
        assert!(GroupFolder::new("main").is_ok());
    }

    #[test]
    fn timestamp_ordering_is_lexicographic() {
        let a = Timestamp::from("2026-01-01T00:00:00Z");
        let b = Timestamp::from("2026-01-02T00:00:00Z");
        assert!(a < b);
    }

    #[test]
    fn task_status_roundtrip() {
        use std::str::FromStr;
        for s in ["active", "paused", "completed", "cancelled"] {
            assert_eq!(TaskStatus::from_str(s).unwrap().to_string(), s);
        }
        assert!(TaskStatus::from_str("bogus").is_err());
    }
}
