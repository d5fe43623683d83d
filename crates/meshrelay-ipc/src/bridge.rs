use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::atomic::{atomic_write, atomic_write_json, timestamped_filename};
use crate::error::Result;
use crate::layout::GroupIpcPaths;
use crate::sink::IpcEventSink;
use crate::types::{FollowUpInput, OutboundMessage, QueryRequest, QueryResponse, TaskRequest};

/// Per-group watcher handles, kept so a group's IPC surface can be torn
/// down independently (e.g. when its sandbox stops) without affecting
/// other groups (§4.3).
struct GroupWatchers {
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

/// Filesystem-based bidirectional channel between the host and the
/// sandboxes it spawns (§4.3). One bridge instance serves every group;
/// each group gets its own watcher tasks over its own `{data_root}/ipc/{folder}/`
/// tree.
pub struct IpcBridge {
    data_root: PathBuf,
    poll_interval: Duration,
    sink: Arc<dyn IpcEventSink>,
    watchers: tokio::sync::Mutex<HashMap<String, GroupWatchers>>,
}

impl IpcBridge {
    pub fn new(data_root: PathBuf, poll_interval: Duration, sink: Arc<dyn IpcEventSink>) -> Self {
        Self {
            data_root,
            poll_interval,
            sink,
            watchers: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    fn paths(&self, folder: &str) -> GroupIpcPaths {
        GroupIpcPaths::new(&self.data_root, folder)
    }

    /// Begins watching a group's `messages/`, `tasks/`, and `queries/`
    /// directories. `is_main` gates `RegisterGroup` task requests (§9:
    /// register_group from a non-main group never takes effect).
    /// `own_jid`/`allowed_jids` gate outbound messages (no cross-group
    /// injection — an emitting group may only address its own JID unless
    /// explicitly allowlisted).
    pub async fn start_group(&self, folder: &str, own_jid: &str, is_main: bool, allowed_jids: Vec<String>) {
        let mut watchers = self.watchers.lock().await;
        if watchers.contains_key(folder) {
            return;
        }

        let running = Arc::new(AtomicBool::new(true));
        let paths = self.paths(folder);
        let mut handles = Vec::with_capacity(3);

        {
            let running = running.clone();
            let sink = self.sink.clone();
            let folder = folder.to_string();
            let own_jid = own_jid.to_string();
            let dir = paths.messages();
            let errors = paths.errors();
            let interval = self.poll_interval;
            handles.push(tokio::spawn(async move {
                watch_messages(&folder, &dir, &errors, &own_jid, &allowed_jids, &running, sink, interval).await;
            }));
        }
        {
            let running = running.clone();
            let sink = self.sink.clone();
            let folder = folder.to_string();
            let dir = paths.tasks();
            let errors = paths.errors();
            let interval = self.poll_interval;
            handles.push(tokio::spawn(async move {
                watch_tasks(&folder, &dir, &errors, is_main, &running, sink, interval).await;
            }));
        }
        {
            let running = running.clone();
            let sink = self.sink.clone();
            let folder = folder.to_string();
            let dir = paths.queries();
            let errors = paths.errors();
            let interval = self.poll_interval;
            handles.push(tokio::spawn(async move {
                watch_queries(&folder, &dir, &errors, &running, sink, interval).await;
            }));
        }

        watchers.insert(folder.to_string(), GroupWatchers { running, handles });
        debug!(folder, "ipc watchers started");
    }

    pub async fn stop_group(&self, folder: &str) {
        if let Some(group) = self.watchers.lock().await.remove(folder) {
            group.running.store(false, Ordering::SeqCst);
            for handle in group.handles {
                handle.abort();
            }
            debug!(folder, "ipc watchers stopped");
        }
    }

    pub async fn is_watching(&self, folder: &str) -> bool {
        self.watchers.lock().await.contains_key(folder)
    }

    /// Writes a follow-up prompt into a running sandbox's inbox (§4.1).
    pub async fn write_follow_up(&self, folder: &str, text: &str) -> Result<()> {
        let paths = self.paths(folder);
        let filename = timestamped_filename("input");
        atomic_write_json(&paths.input(), &filename, &FollowUpInput { text: text.to_string() }).await
    }

    /// Writes the `_close` sentinel so the sandbox can exit gracefully
    /// instead of being killed (§4.3).
    pub async fn write_close_sentinel(&self, folder: &str) -> Result<()> {
        let paths = self.paths(folder);
        atomic_write(&paths.input(), GroupIpcPaths::CLOSE_SENTINEL, b"{}").await
    }

    /// Answers an external query request (§4.8).
    pub async fn write_query_response(&self, folder: &str, response: &QueryResponse) -> Result<()> {
        let paths = self.paths(folder);
        let filename = format!("{}.json", response.uuid);
        atomic_write_json(&paths.responses(), &filename, response).await
    }
}

async fn list_json_files(dir: &Path) -> Vec<PathBuf> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(_) => return Vec::new(),
    };

    let mut files = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let is_hidden = path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with('.'));
        if !is_hidden && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    files
}

/// Moves a malformed or unauthorized file into `errors/` rather than
/// deleting it, so operators can inspect what the sandbox actually wrote
/// (§4.3).
async fn quarantine(path: &Path, errors_dir: &Path, reason: &str, folder: &str) {
    if let Err(e) = tokio::fs::create_dir_all(errors_dir).await {
        warn!(folder, error = %e, "failed to create ipc errors directory");
        return;
    }
    let dest = errors_dir.join(path.file_name().unwrap_or_default());
    match tokio::fs::rename(path, &dest).await {
        Ok(()) => warn!(folder, path = %path.display(), reason, "quarantined ipc payload"),
        Err(e) => warn!(folder, path = %path.display(), error = %e, "failed to quarantine ipc payload"),
    }
}

async fn watch_messages(
    folder: &str,
    dir: &Path,
    errors_dir: &Path,
    own_jid: &str,
    allowed_jids: &[String],
    running: &AtomicBool,
    sink: Arc<dyn IpcEventSink>,
    interval: Duration,
) {
    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(interval).await;
        for path in list_json_files(dir).await {
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(folder, path = %path.display(), error = %e, "failed to read outbound message");
                    continue;
                }
            };
            match serde_json::from_str::<OutboundMessage>(&content) {
                Ok(message) if message.chat_jid == own_jid || allowed_jids.iter().any(|j| j == &message.chat_jid) => {
                    sink.on_message(folder, message).await;
                    let _ = tokio::fs::remove_file(&path).await;
                }
                Ok(_) => {
                    quarantine(&path, errors_dir, "chat_jid not owned by this group", folder).await;
                }
                Err(e) => {
                    quarantine(&path, errors_dir, &e.to_string(), folder).await;
                }
            }
        }
    }
}

async fn watch_tasks(
    folder: &str,
    dir: &Path,
    errors_dir: &Path,
    is_main: bool,
    running: &AtomicBool,
    sink: Arc<dyn IpcEventSink>,
    interval: Duration,
) {
    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(interval).await;
        for path in list_json_files(dir).await {
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(folder, path = %path.display(), error = %e, "failed to read task request");
                    continue;
                }
            };
            match serde_json::from_str::<TaskRequest>(&content) {
                Ok(TaskRequest::RegisterGroup { .. }) if !is_main => {
                    quarantine(&path, errors_dir, "register_group from non-main group", folder).await;
                }
                Ok(task) => {
                    sink.on_task(folder, task).await;
                    let _ = tokio::fs::remove_file(&path).await;
                }
                Err(e) => {
                    quarantine(&path, errors_dir, &e.to_string(), folder).await;
                }
            }
        }
    }
}

async fn watch_queries(
    folder: &str,
    dir: &Path,
    errors_dir: &Path,
    running: &AtomicBool,
    sink: Arc<dyn IpcEventSink>,
    interval: Duration,
) {
    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(interval).await;
        for path in list_json_files(dir).await {
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(folder, path = %path.display(), error = %e, "failed to read query request");
                    continue;
                }
            };
            match serde_json::from_str::<QueryRequest>(&content) {
                Ok(query) => {
                    sink.on_query(folder, query).await;
                    let _ = tokio::fs::remove_file(&path).await;
                }
                Err(e) => {
                    quarantine(&path, errors_dir, &e.to_string(), folder).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tempfile::tempdir;
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Default)]
    struct RecordingSink {
        messages: AsyncMutex<Vec<(String, OutboundMessage)>>,
        tasks: AsyncMutex<Vec<(String, TaskRequest)>>,
        queries: AsyncMutex<Vec<(String, QueryRequest)>>,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl IpcEventSink for RecordingSink {
        async fn on_message(&self, folder: &str, message: OutboundMessage) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.messages.lock().await.push((folder.to_string(), message));
        }

        async fn on_task(&self, folder: &str, task: TaskRequest) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.tasks.lock().await.push((folder.to_string(), task));
        }

        async fn on_query(&self, folder: &str, query: QueryRequest) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.queries.lock().await.push((folder.to_string(), query));
        }
    }

    async fn wait_for(sink: &RecordingSink, count: u32) {
        for _ in 0..50 {
            if sink.calls.load(Ordering::SeqCst) >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn delivers_own_jid_message_and_removes_file() {
        let root = tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let bridge = IpcBridge::new(root.path().to_path_buf(), Duration::from_millis(10), sink.clone());
        bridge.start_group("main", "telegram:1", true, vec![]).await;

        let paths = GroupIpcPaths::new(root.path(), "main");
        atomic_write_json(
            &paths.messages(),
            "m1.json",
            &OutboundMessage { chat_jid: "telegram:1".to_string(), text: "hi".to_string(), parse_mode: None },
        )
        .await
        .unwrap();

        wait_for(&sink, 1).await;
        bridge.stop_group("main").await;

        let msgs = sink.messages.lock().await;
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].1.text, "hi");
        assert!(!paths.messages().join("m1.json").exists());
    }

    #[tokio::test]
    async fn quarantines_message_for_unowned_jid() {
        let root = tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let bridge = IpcBridge::new(root.path().to_path_buf(), Duration::from_millis(10), sink.clone());
        bridge.start_group("side", "telegram:side", false, vec![]).await;

        let paths = GroupIpcPaths::new(root.path(), "side");
        atomic_write_json(
            &paths.messages(),
            "m1.json",
            &OutboundMessage { chat_jid: "telegram:other".to_string(), text: "hi".to_string(), parse_mode: None },
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        bridge.stop_group("side").await;

        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
        assert!(paths.errors().join("m1.json").exists());
    }

    #[tokio::test]
    async fn quarantines_register_group_from_non_main() {
        let root = tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let bridge = IpcBridge::new(root.path().to_path_buf(), Duration::from_millis(10), sink.clone());
        bridge.start_group("side", "telegram:side", false, vec![]).await;

        let paths = GroupIpcPaths::new(root.path(), "side");
        atomic_write_json(
            &paths.tasks(),
            "t1.json",
            &TaskRequest::RegisterGroup {
                jid: "telegram:new".to_string(),
                display_name: "New".to_string(),
                folder: "new".to_string(),
                requires_trigger: true,
                trigger: "@bot".to_string(),
            },
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        bridge.stop_group("side").await;

        assert_eq!(sink.tasks.lock().await.len(), 0);
        assert!(paths.errors().join("t1.json").exists());
    }

    #[tokio::test]
    async fn register_group_from_main_is_delivered() {
        let root = tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let bridge = IpcBridge::new(root.path().to_path_buf(), Duration::from_millis(10), sink.clone());
        bridge.start_group("main", "telegram:main", true, vec![]).await;

        let paths = GroupIpcPaths::new(root.path(), "main");
        atomic_write_json(
            &paths.tasks(),
            "t1.json",
            &TaskRequest::RegisterGroup {
                jid: "telegram:new".to_string(),
                display_name: "New".to_string(),
                folder: "new".to_string(),
                requires_trigger: true,
                trigger: "@bot".to_string(),
            },
        )
        .await
        .unwrap();

        wait_for(&sink, 1).await;
        bridge.stop_group("main").await;

        assert_eq!(sink.tasks.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn malformed_query_json_is_quarantined() {
        let root = tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let bridge = IpcBridge::new(root.path().to_path_buf(), Duration::from_millis(10), sink.clone());
        bridge.start_group("main", "telegram:main", true, vec![]).await;

        let paths = GroupIpcPaths::new(root.path(), "main");
        tokio::fs::create_dir_all(paths.queries()).await.unwrap();
        tokio::fs::write(paths.queries().join("q1.json"), b"not json").await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        bridge.stop_group("main").await;

        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
        assert!(paths.errors().join("q1.json").exists());
    }

    #[tokio::test]
    async fn write_follow_up_and_close_sentinel() {
        let root = tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let bridge = IpcBridge::new(root.path().to_path_buf(), Duration::from_millis(10), sink);

        bridge.write_follow_up("main", "keep going").await.unwrap();
        bridge.write_close_sentinel("main").await.unwrap();

        let paths = GroupIpcPaths::new(root.path(), "main");
        let mut entries = tokio::fs::read_dir(paths.input()).await.unwrap();
        let mut names = Vec::new();
        while let Ok(Some(e)) = entries.next_entry().await {
            names.push(e.file_name().to_string_lossy().to_string());
        }
        assert!(names.iter().any(|n| n.starts_with("input-")));
        assert!(names.iter().any(|n| n == "_close"));
    }

    #[tokio::test]
    async fn write_query_response_lands_in_responses_dir() {
        let root = tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let bridge = IpcBridge::new(root.path().to_path_buf(), Duration::from_millis(10), sink);

        bridge
            .write_query_response(
                "main",
                &QueryResponse {
                    uuid: "abc".to_string(),
                    status: crate::types::QueryStatus::Ok,
                    result: serde_json::json!({"ok": true}),
                },
            )
            .await
            .unwrap();

        let paths = GroupIpcPaths::new(root.path(), "main");
        assert!(paths.responses().join("abc.json").exists());
    }
}
