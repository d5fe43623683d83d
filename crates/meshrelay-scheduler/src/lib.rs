//! Scheduler (§4.5): raises cron/interval/once tasks into the Group Queue
//! and records their run outcomes.

pub mod engine;
pub mod error;
pub mod schedule;

pub use engine::SchedulerEngine;
pub use error::{Result, SchedulerError};
pub use schedule::compute_next_run;

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use meshrelay_core::{ContextMode, GroupFolder, Jid, RunOutcome, ScheduleKind, ScheduledTask, TaskStatus, Timestamp};
    use meshrelay_queue::{GroupDispatch, GroupQueue, WorkItem};
    use meshrelay_store::{SqliteStore, Store};

    use super::*;

    struct NoopDispatch;

    #[async_trait]
    impl GroupDispatch for NoopDispatch {
        async fn run(&self, _jid: &str, _item: WorkItem) -> meshrelay_queue::Result<()> {
            Ok(())
        }
    }

    fn make_task(id: &str, next_run: Option<Timestamp>) -> ScheduledTask {
        ScheduledTask {
            id: id.to_string(),
            owner_folder: GroupFolder::new("main").unwrap(),
            target_jid: Jid::from("tg:1"),
            prompt: "say hi".to_string(),
            schedule: ScheduleKind::Interval { ms: 60_000 },
            status: TaskStatus::Active,
            next_run,
            context_mode: ContextMode::Group,
        }
    }

    #[tokio::test]
    async fn raises_due_tasks_into_queue() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
        let queue = Arc::new(GroupQueue::new(4, Arc::new(NoopDispatch)));

        let due = Timestamp((chrono::Utc::now() - chrono::Duration::seconds(5)).to_rfc3339());
        store.create_task(&make_task("t1", Some(due))).await.unwrap();

        let engine = SchedulerEngine::new(store.clone(), queue.clone(), Duration::from_secs(10), "UTC".to_string());
        engine.raise_due_tasks().await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        // The no-op dispatch completes instantly, so by now the group is idle again.
        assert!(!queue.is_active("tg:1").await);
    }

    #[tokio::test]
    async fn skips_tasks_not_yet_due() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
        let queue = Arc::new(GroupQueue::new(4, Arc::new(NoopDispatch)));

        let future = Timestamp((chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339());
        store.create_task(&make_task("t2", Some(future))).await.unwrap();

        let engine = SchedulerEngine::new(store.clone(), queue.clone(), Duration::from_secs(10), "UTC".to_string());
        engine.raise_due_tasks().await.unwrap();

        let due = store.get_due_tasks(&Timestamp::now()).await.unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn record_completion_marks_once_task_completed() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
        let queue = Arc::new(GroupQueue::new(4, Arc::new(NoopDispatch)));
        let engine = SchedulerEngine::new(store.clone(), queue, Duration::from_secs(10), "UTC".to_string());

        let past = Timestamp((chrono::Utc::now() - chrono::Duration::seconds(5)).to_rfc3339());
        let mut task = make_task("t3", Some(past.clone()));
        task.schedule = ScheduleKind::Once { at: past };
        store.create_task(&task).await.unwrap();

        engine
            .record_completion(task.clone(), Timestamp::now(), RunOutcome::Success, "done".to_string())
            .await
            .unwrap();

        let due = store.get_due_tasks(&Timestamp::now()).await.unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn record_completion_reschedules_interval_task() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
        let queue = Arc::new(GroupQueue::new(4, Arc::new(NoopDispatch)));
        let engine = SchedulerEngine::new(store.clone(), queue, Duration::from_secs(10), "UTC".to_string());

        let task = make_task("t4", Some(Timestamp::now()));
        store.create_task(&task).await.unwrap();

        engine
            .record_completion(task.clone(), Timestamp::now(), RunOutcome::Success, "ok".to_string())
            .await
            .unwrap();

        // The interval task should have a future next_run and remain active.
        let far_future = Timestamp((chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339());
        let due = store.get_due_tasks(&far_future).await.unwrap();
        assert!(due.iter().any(|t| t.id == "t4" && t.status == TaskStatus::Active));
    }
}
