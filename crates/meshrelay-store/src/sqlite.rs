use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use meshrelay_core::{
    ContextMode, Group, GroupFolder, Jid, Message, RunOutcome, ScheduleKind, ScheduledTask,
    TaskRunLog, TaskStatus, Timestamp,
};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::instrument;

use crate::error::{Result, StoreError};
use crate::Store;

/// `rusqlite`-backed [`Store`] implementation.
///
/// Wraps a single connection in a `Mutex`: every statement here is a quick
/// single-row/single-batch operation with no `.await` held across the lock,
/// so a blocking mutex is sufficient (matches the teacher's
/// `SessionManager`/`SchedulerEngine` connection-handling convention rather
/// than pulling in a connection pool the core doesn't need).
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the SQLite database at `path` and run schema setup.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        crate::db::init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        crate::db::init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        jid: Jid(row.get(0)?),
        display_name: row.get(1)?,
        folder: GroupFolder(row.get(2)?),
        runtime_override: row.get(3)?,
        model_override: row.get(4)?,
        requires_trigger: row.get::<_, i64>(5)? != 0,
        trigger: row.get(6)?,
        is_main: row.get::<_, i64>(7)? != 0,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        jid: Jid(row.get(1)?),
        sender_id: row.get(2)?,
        sender_display_name: row.get(3)?,
        timestamp: Timestamp(row.get(4)?),
        body: row.get(5)?,
        is_from_assistant: row.get::<_, i64>(6)? != 0,
    })
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledTask> {
    let schedule_json: String = row.get(4)?;
    let status_str: String = row.get(5)?;
    let context_mode_str: String = row.get(7)?;
    let next_run: Option<String> = row.get(6)?;

    let schedule: ScheduleKind = serde_json::from_str(&schedule_json).unwrap_or(ScheduleKind::Once {
        at: Timestamp(String::new()),
    });
    let status = status_str.parse().unwrap_or(TaskStatus::Cancelled);
    let context_mode = match context_mode_str.as_str() {
        "isolated" => ContextMode::Isolated,
        _ => ContextMode::Group,
    };

    Ok(ScheduledTask {
        id: row.get(0)?,
        owner_folder: GroupFolder(row.get(1)?),
        target_jid: Jid(row.get(2)?),
        prompt: row.get(3)?,
        schedule,
        status,
        next_run: next_run.map(Timestamp),
        context_mode,
    })
}

#[async_trait]
impl Store for SqliteStore {
    #[instrument(skip(self))]
    async fn get_registered_groups(&self) -> Result<Vec<Group>> {
        let db = self.conn.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT jid, display_name, folder, runtime_override, model_override,
                    requires_trigger, trigger, is_main FROM groups",
        )?;
        let rows = stmt.query_map([], row_to_group)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    #[instrument(skip(self, group), fields(jid = %group.jid, folder = %group.folder))]
    async fn set_registered_group(&self, group: Group) -> Result<()> {
        let db = self.conn.lock().unwrap();
        db.execute(
            "INSERT INTO groups
                (jid, display_name, folder, runtime_override, model_override,
                 requires_trigger, trigger, is_main)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(jid) DO UPDATE SET
                display_name = excluded.display_name,
                folder = excluded.folder,
                runtime_override = excluded.runtime_override,
                model_override = excluded.model_override,
                requires_trigger = excluded.requires_trigger,
                trigger = excluded.trigger,
                is_main = excluded.is_main",
            params![
                group.jid.as_str(),
                group.display_name,
                group.folder.as_str(),
                group.runtime_override,
                group.model_override,
                group.requires_trigger as i64,
                group.trigger,
                group.is_main as i64,
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_all_sessions(&self) -> Result<HashMap<GroupFolder, String>> {
        let db = self.conn.lock().unwrap();
        let mut stmt = db.prepare("SELECT folder, session_id FROM sessions")?;
        let rows = stmt.query_map([], |row| {
            Ok((GroupFolder(row.get(0)?), row.get::<_, String>(1)?))
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    #[instrument(skip(self, session_id), fields(folder = %folder))]
    async fn set_session(&self, folder: &GroupFolder, session_id: &str) -> Result<()> {
        let db = self.conn.lock().unwrap();
        db.execute(
            "INSERT INTO sessions (folder, session_id) VALUES (?1, ?2)
             ON CONFLICT(folder) DO UPDATE SET session_id = excluded.session_id",
            params![folder.as_str(), session_id],
        )?;
        Ok(())
    }

    #[instrument(skip(self), fields(folder = %folder))]
    async fn delete_session(&self, folder: &GroupFolder) -> Result<()> {
        let db = self.conn.lock().unwrap();
        db.execute("DELETE FROM sessions WHERE folder = ?1", params![folder.as_str()])?;
        Ok(())
    }

    #[instrument(skip(self, jids), fields(count = jids.len(), since = %since_ts))]
    async fn get_new_messages(&self, jids: &[Jid], since_ts: &Timestamp) -> Result<Vec<Message>> {
        if jids.is_empty() {
            return Ok(Vec::new());
        }
        let db = self.conn.lock().unwrap();
        let placeholders = std::iter::repeat("?").take(jids.len()).collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT id, jid, sender_id, sender_display_name, timestamp, body, is_from_assistant
             FROM messages
             WHERE timestamp > ?1 AND jid IN ({placeholders})
             ORDER BY timestamp ASC"
        );
        let mut stmt = db.prepare(&sql)?;
        let mut bound: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(jids.len() + 1);
        let since_str = since_ts.as_str().to_string();
        bound.push(&since_str);
        let jid_strs: Vec<String> = jids.iter().map(|j| j.as_str().to_string()).collect();
        for s in &jid_strs {
            bound.push(s);
        }
        let rows = stmt.query_map(bound.as_slice(), row_to_message)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    #[instrument(skip(self), fields(jid = %jid, since = %since_ts))]
    async fn get_messages_since(&self, jid: &Jid, since_ts: &Timestamp) -> Result<Vec<Message>> {
        let db = self.conn.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, jid, sender_id, sender_display_name, timestamp, body, is_from_assistant
             FROM messages
             WHERE jid = ?1 AND timestamp > ?2
             ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(params![jid.as_str(), since_ts.as_str()], row_to_message)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    #[instrument(skip(self, msg), fields(jid = %msg.jid, id = %msg.id))]
    async fn store_message(&self, msg: &Message) -> Result<()> {
        let db = self.conn.lock().unwrap();
        db.execute(
            "INSERT OR IGNORE INTO messages
                (id, jid, sender_id, sender_display_name, timestamp, body, is_from_assistant)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                msg.id,
                msg.jid.as_str(),
                msg.sender_id,
                msg.sender_display_name,
                msg.timestamp.as_str(),
                msg.body,
                msg.is_from_assistant as i64,
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self), fields(jid = %jid))]
    async fn store_chat_metadata(&self, jid: &Jid, display_name: &str) -> Result<()> {
        let db = self.conn.lock().unwrap();
        db.execute(
            "UPDATE groups SET display_name = ?1 WHERE jid = ?2",
            params![display_name, jid.as_str()],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_router_state(&self, key: &str) -> Result<Option<String>> {
        let db = self.conn.lock().unwrap();
        let value = db
            .query_row(
                "SELECT value FROM router_state WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    #[instrument(skip(self, value))]
    async fn set_router_state(&self, key: &str, value: &str) -> Result<()> {
        let db = self.conn.lock().unwrap();
        db.execute(
            "INSERT INTO router_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    #[instrument(skip(self), fields(task_id = %task_id))]
    async fn get_task(&self, task_id: &str) -> Result<Option<ScheduledTask>> {
        let db = self.conn.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, owner_folder, target_jid, prompt, schedule, status, next_run, context_mode
             FROM tasks
             WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![task_id], row_to_task)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(now = %now))]
    async fn get_due_tasks(&self, now: &Timestamp) -> Result<Vec<ScheduledTask>> {
        let db = self.conn.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, owner_folder, target_jid, prompt, schedule, status, next_run, context_mode
             FROM tasks
             WHERE status = 'active' AND next_run IS NOT NULL AND next_run <= ?1
             ORDER BY next_run ASC",
        )?;
        let rows = stmt.query_map(params![now.as_str()], row_to_task)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    #[instrument(skip(self, task), fields(id = %task.id, owner = %task.owner_folder))]
    async fn create_task(&self, task: &ScheduledTask) -> Result<()> {
        let db = self.conn.lock().unwrap();
        let schedule_json = serde_json::to_string(&task.schedule)?;
        let context_mode_str = match task.context_mode {
            ContextMode::Group => "group",
            ContextMode::Isolated => "isolated",
        };
        db.execute(
            "INSERT INTO tasks
                (id, owner_folder, target_jid, prompt, schedule, status, next_run, context_mode)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                task.id,
                task.owner_folder.as_str(),
                task.target_jid.as_str(),
                task.prompt,
                schedule_json,
                task.status.to_string(),
                task.next_run.as_ref().map(|t| t.as_str().to_string()),
                context_mode_str,
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self, task), fields(id = %task.id))]
    async fn update_task(&self, task: &ScheduledTask) -> Result<()> {
        let db = self.conn.lock().unwrap();
        let schedule_json = serde_json::to_string(&task.schedule)?;
        let context_mode_str = match task.context_mode {
            ContextMode::Group => "group",
            ContextMode::Isolated => "isolated",
        };
        let rows = db.execute(
            "UPDATE tasks SET
                owner_folder = ?2, target_jid = ?3, prompt = ?4, schedule = ?5,
                status = ?6, next_run = ?7, context_mode = ?8
             WHERE id = ?1",
            params![
                task.id,
                task.owner_folder.as_str(),
                task.target_jid.as_str(),
                task.prompt,
                schedule_json,
                task.status.to_string(),
                task.next_run.as_ref().map(|t| t.as_str().to_string()),
                context_mode_str,
            ],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("task {}", task.id)));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_task(&self, task_id: &str) -> Result<()> {
        let db = self.conn.lock().unwrap();
        db.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;
        Ok(())
    }

    #[instrument(skip(self, log), fields(task_id = %log.task_id))]
    async fn log_task_run(&self, log: &TaskRunLog) -> Result<()> {
        let db = self.conn.lock().unwrap();
        let outcome_str = match log.outcome {
            RunOutcome::Success => "success",
            RunOutcome::Error => "error",
        };
        db.execute(
            "INSERT INTO task_run_log (task_id, started_at, ended_at, outcome, result_summary)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                log.task_id,
                log.started_at.as_str(),
                log.ended_at.as_str(),
                outcome_str,
                log.result_summary,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(jid: &str, folder: &str) -> Group {
        Group::new_main(Jid::from(jid), "Main", GroupFolder::new(folder).unwrap())
    }

    #[tokio::test]
    async fn register_and_fetch_group() {
        let store = SqliteStore::in_memory().unwrap();
        store.set_registered_group(group("tg:1", "main")).await.unwrap();
        let groups = store.get_registered_groups().await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].folder.as_str(), "main");
    }

    #[tokio::test]
    async fn session_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        let folder = GroupFolder::new("main").unwrap();
        store.set_session(&folder, "sess-1").await.unwrap();
        let sessions = store.get_all_sessions().await.unwrap();
        assert_eq!(sessions.get(&folder).map(String::as_str), Some("sess-1"));
        store.delete_session(&folder).await.unwrap();
        let sessions = store.get_all_sessions().await.unwrap();
        assert!(!sessions.contains_key(&folder));
    }

    #[tokio::test]
    async fn router_state_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.get_router_state("last_seen_ts").await.unwrap(), None);
        store.set_router_state("last_seen_ts", "2026-01-01T00:00:00Z").await.unwrap();
        assert_eq!(
            store.get_router_state("last_seen_ts").await.unwrap().as_deref(),
            Some("2026-01-01T00:00:00Z")
        );
    }

    #[tokio::test]
    async fn messages_ordered_and_filtered() {
        let store = SqliteStore::in_memory().unwrap();
        for (id, ts) in [("1", "T1"), ("2", "T2"), ("3", "T3")] {
            store
                .store_message(&Message {
                    id: id.to_string(),
                    jid: Jid::from("tg:1"),
                    sender_id: "u1".to_string(),
                    sender_display_name: None,
                    timestamp: Timestamp::from(ts),
                    body: format!("msg {id}"),
                    is_from_assistant: false,
                })
                .await
                .unwrap();
        }
        let msgs = store
            .get_messages_since(&Jid::from("tg:1"), &Timestamp::from("T1"))
            .await
            .unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].id, "2");
        assert_eq!(msgs[1].id, "3");
    }

    #[tokio::test]
    async fn due_tasks_respect_status_and_next_run() {
        let store = SqliteStore::in_memory().unwrap();
        let task = ScheduledTask {
            id: "t1".to_string(),
            owner_folder: GroupFolder::new("main").unwrap(),
            target_jid: Jid::from("tg:1"),
            prompt: "status".to_string(),
            schedule: ScheduleKind::Interval { ms: 60_000 },
            status: TaskStatus::Active,
            next_run: Some(Timestamp::from("2026-01-01T00:00:00Z")),
            context_mode: ContextMode::Group,
        };
        store.create_task(&task).await.unwrap();

        let due = store
            .get_due_tasks(&Timestamp::from("2026-01-01T00:00:01Z"))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);

        let not_due = store
            .get_due_tasks(&Timestamp::from("2025-12-31T00:00:00Z"))
            .await
            .unwrap();
        assert!(not_due.is_empty());
    }
}
