use rusqlite::Connection;

use crate::error::Result;

/// Create every table and index the core needs, idempotently.
///
/// Safe to call on every startup. Mirrors the teacher's per-subsystem
/// `init_db` convention (`STRICT` tables, explicit indices on the columns
/// the poll loops filter on).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS groups (
            jid               TEXT NOT NULL PRIMARY KEY,
            display_name      TEXT NOT NULL,
            folder            TEXT NOT NULL UNIQUE,
            runtime_override  TEXT,
            model_override    TEXT,
            requires_trigger  INTEGER NOT NULL DEFAULT 0,
            trigger           TEXT NOT NULL DEFAULT '',
            is_main           INTEGER NOT NULL DEFAULT 0
        ) STRICT;

        CREATE TABLE IF NOT EXISTS messages (
            id                  TEXT NOT NULL,
            jid                 TEXT NOT NULL,
            sender_id           TEXT NOT NULL,
            sender_display_name TEXT,
            timestamp           TEXT NOT NULL,
            body                TEXT NOT NULL,
            is_from_assistant   INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (jid, id)
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_messages_jid_ts ON messages (jid, timestamp);
        CREATE INDEX IF NOT EXISTS idx_messages_ts ON messages (timestamp);

        CREATE TABLE IF NOT EXISTS sessions (
            folder     TEXT NOT NULL PRIMARY KEY,
            session_id TEXT NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS router_state (
            key   TEXT NOT NULL PRIMARY KEY,
            value TEXT NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS tasks (
            id            TEXT NOT NULL PRIMARY KEY,
            owner_folder  TEXT NOT NULL,
            target_jid    TEXT NOT NULL,
            prompt        TEXT NOT NULL,
            schedule      TEXT NOT NULL,   -- JSON-encoded ScheduleKind
            status        TEXT NOT NULL,
            next_run      TEXT,
            context_mode  TEXT NOT NULL
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_tasks_next_run ON tasks (status, next_run);

        CREATE TABLE IF NOT EXISTS task_run_log (
            task_id        TEXT NOT NULL,
            started_at     TEXT NOT NULL,
            ended_at       TEXT NOT NULL,
            outcome        TEXT NOT NULL,
            result_summary TEXT NOT NULL
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_task_run_log_task ON task_run_log (task_id, started_at);
        ",
    )?;
    Ok(())
}
