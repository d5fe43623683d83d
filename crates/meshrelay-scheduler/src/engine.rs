//! Raises due tasks into the Group Queue and records their outcomes (§4.5).

use std::sync::Arc;
use std::time::Duration;

use meshrelay_core::{RunOutcome, ScheduledTask, TaskRunLog, TaskStatus, Timestamp};
use meshrelay_queue::GroupQueue;
use meshrelay_store::Store;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::schedule::compute_next_run;

pub struct SchedulerEngine {
    store: Arc<dyn Store>,
    queue: Arc<GroupQueue>,
    poll_interval: Duration,
    timezone: String,
}

impl SchedulerEngine {
    pub fn new(store: Arc<dyn Store>, queue: Arc<GroupQueue>, poll_interval: Duration, timezone: String) -> Self {
        Self { store, queue, poll_interval, timezone }
    }

    /// Drives the due-task poll loop until cancelled (§4.5). Takes `Arc<Self>`
    /// rather than an owned value since `record_completion` is also called
    /// directly by the dispatcher once a scheduled task's sandbox invocation
    /// finishes, so the engine outlives this loop.
    pub async fn run(self: Arc<Self>, shutdown: Arc<tokio::sync::Notify>) {
        info!("scheduler started");
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.raise_due_tasks().await {
                        error!("scheduler tick failed: {e}");
                    }
                }
                _ = shutdown.notified() => {
                    info!("scheduler stopping");
                    break;
                }
            }
        }
    }

    /// One poll cycle: query due tasks, enqueue each into the Group Queue for
    /// its owning group (§4.5 step 1).
    pub async fn raise_due_tasks(&self) -> Result<()> {
        let now = Timestamp::now();
        let due = self.store.get_due_tasks(&now).await?;
        for task in due {
            info!(task_id = %task.id, jid = %task.target_jid, "raising due task");
            self.queue.enqueue_task(task.target_jid.as_str(), task).await;
        }
        Ok(())
    }

    /// Called once a task's sandbox invocation has finished: recomputes
    /// `next_run`, transitions `status`, and writes a Task Run Log (§4.5
    /// step 2-3).
    pub async fn record_completion(
        &self,
        mut task: ScheduledTask,
        started_at: Timestamp,
        outcome: RunOutcome,
        result_summary: String,
    ) -> Result<()> {
        let ended_at = Timestamp::now();
        let now = parse_timestamp(&ended_at)?;

        match compute_next_run(&task.schedule, now, &self.timezone) {
            Ok(Some(next)) => {
                task.next_run = Some(next);
                task.status = TaskStatus::Active;
            }
            Ok(None) => {
                task.next_run = None;
                task.status = TaskStatus::Completed;
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "failed to compute next run, pausing task");
                task.next_run = None;
                task.status = TaskStatus::Paused;
            }
        }

        self.store.update_task(&task).await?;
        self.store
            .log_task_run(&TaskRunLog {
                task_id: task.id.clone(),
                started_at,
                ended_at,
                outcome,
                result_summary: truncate(&result_summary, 2000),
            })
            .await?;
        Ok(())
    }
}

fn parse_timestamp(ts: &Timestamp) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(ts.as_str())
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| crate::error::SchedulerError::InvalidCron {
            expression: ts.as_str().to_string(),
            reason: e.to_string(),
        })
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.chars().take(max_chars).collect()
}
