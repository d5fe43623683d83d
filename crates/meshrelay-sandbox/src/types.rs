use serde::{Deserialize, Serialize};

/// The single JSON document written to a sandbox's standard input (§4.2,
/// §6 "Sandbox wire protocol").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxInput {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub group_folder: String,
    pub chat_jid: String,
    pub is_main: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_scheduled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Written to stdin only — never to mounted files or child-shell
    /// environments (§4.2, §9 "Secrets handling").
    #[serde(default)]
    pub secrets: std::collections::HashMap<String, String>,
}

/// One decoded framed record from the sandbox's standard output (§4.2, §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxFrame {
    pub status: Option<String>,
    pub result: Option<String>,
    pub new_session_id: Option<String>,
    pub model: Option<String>,
    pub error: Option<String>,
    pub event: Option<FrameEvent>,
}

impl SandboxFrame {
    /// A frame carrying a non-null `result` is the final reply for this
    /// invocation (§4.2).
    pub fn is_final(&self) -> bool {
        self.result.is_some()
    }

    /// Whether this frame should refresh the Sandbox Runner's idle timer —
    /// final results and tool events do; session-keepalive frames with no
    /// `result` and no `event` do not (§4.2).
    pub fn is_meaningful(&self) -> bool {
        self.is_final() || self.event.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FrameEvent {
    ToolStart { summary: String },
    TextDelta { text: String },
}

/// Which mounts a spawned sandbox gets (§4.2 "Mounts (design level, not
/// syntax)"). Concrete command-line rendering lives in [`crate::spawn`].
#[derive(Debug, Clone)]
pub struct MountSpec {
    pub host_path: std::path::PathBuf,
    pub guest_path: std::path::PathBuf,
    pub read_only: bool,
}

impl MountSpec {
    pub fn new(host_path: impl Into<std::path::PathBuf>, guest_path: impl Into<std::path::PathBuf>, read_only: bool) -> Self {
        Self {
            host_path: host_path.into(),
            guest_path: guest_path.into(),
            read_only,
        }
    }
}

/// Everything the Runner needs to spawn one invocation (§4.2 spawn contract).
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub runtime_image: String,
    pub group_folder: String,
    pub mounts: Vec<MountSpec>,
    pub input: SandboxInput,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_frame_detection() {
        let keepalive = SandboxFrame { status: Some("success".into()), ..Default::default() };
        assert!(!keepalive.is_final());
        assert!(!keepalive.is_meaningful());

        let result = SandboxFrame { result: Some("hello".into()), ..Default::default() };
        assert!(result.is_final());
        assert!(result.is_meaningful());

        let tool = SandboxFrame {
            event: Some(FrameEvent::ToolStart { summary: "bash".into() }),
            ..Default::default()
        };
        assert!(!tool.is_final());
        assert!(tool.is_meaningful());
    }
}
