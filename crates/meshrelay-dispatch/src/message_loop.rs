//! Message Loop (§4.4): polls the Store for new inbound messages, applies
//! trigger gating, and either pipes a follow-up into a running sandbox or
//! enqueues a message-check batch into the Group Queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use meshrelay_core::{Jid, Message, Timestamp};
use meshrelay_queue::GroupQueue;
use meshrelay_sessions::SharedState;
use meshrelay_store::Store;
use tracing::{info, instrument, warn};

use crate::error::Result;
use crate::prompt::format_messages;
use crate::trigger::matches_trigger;

pub struct MessageLoop {
    store: Arc<dyn Store>,
    state: Arc<SharedState>,
    queue: Arc<GroupQueue>,
    poll_interval: Duration,
}

impl MessageLoop {
    pub fn new(store: Arc<dyn Store>, state: Arc<SharedState>, queue: Arc<GroupQueue>, poll_interval: Duration) -> Self {
        Self { store, state, queue, poll_interval }
    }

    /// Drives the poll loop until cancelled (§4.4, §5 "Message Loop... run
    /// as independent tasks").
    pub async fn run(self, shutdown: Arc<tokio::sync::Notify>) {
        info!("message loop started");
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!("message loop tick failed: {e}");
                    }
                }
                _ = shutdown.notified() => {
                    info!("message loop stopping");
                    break;
                }
            }
        }
    }

    /// On boot, enqueue a message-check for every registered group with
    /// unprocessed messages since its per-group cursor — tolerates crashes
    /// between advancing `last_seen_ts` and completing dispatch (§4.4
    /// "Startup recovery").
    #[instrument(skip(self))]
    pub async fn startup_recovery(&self) -> Result<()> {
        for group in self.state.all_groups().await {
            let since = self
                .state
                .last_agent_ts(&group.jid)
                .await?
                .unwrap_or_else(|| Timestamp::from(""));
            let pending = self.store.get_messages_since(&group.jid, &since).await?;
            if !pending.is_empty() {
                info!(jid = %group.jid, count = pending.len(), "recovering unprocessed messages on startup");
                self.queue.enqueue_message_check(group.jid.as_str()).await;
            }
        }
        Ok(())
    }

    /// One poll cycle (§4.4 steps 1-2).
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<()> {
        let groups = self.state.all_groups().await;
        if groups.is_empty() {
            return Ok(());
        }
        let jids: Vec<Jid> = groups.iter().map(|g| g.jid.clone()).collect();

        let since = self.state.last_seen_ts().await.unwrap_or_else(|| Timestamp::from(""));
        let new_messages = self.store.get_new_messages(&jids, &since).await?;
        if new_messages.is_empty() {
            return Ok(());
        }

        if let Some(latest) = new_messages.last() {
            self.state.advance_last_seen(latest.timestamp.clone()).await?;
        }

        let mut batches: HashMap<Jid, Vec<Message>> = HashMap::new();
        for msg in new_messages {
            batches.entry(msg.jid.clone()).or_default().push(msg);
        }

        for (jid, batch) in batches {
            self.dispatch_batch(&jid, batch).await?;
        }
        Ok(())
    }

    async fn dispatch_batch(&self, jid: &Jid, batch: Vec<Message>) -> Result<()> {
        let Some(group) = self.state.get_group(jid).await else {
            warn!(%jid, "message batch for a jid with no matching group, dropping");
            return Ok(());
        };

        if !group.is_main && group.requires_trigger {
            let triggered = batch.iter().any(|m| matches_trigger(&m.body, &group.trigger));
            if !triggered {
                return Ok(());
            }
        }

        if self.queue.is_active(jid.as_str()).await {
            let text = format_messages(&batch);
            if self.queue.send_follow_up(jid.as_str(), &text).await {
                if let Some(last) = batch.last() {
                    self.state.set_last_agent_ts(jid, last.timestamp.clone()).await?;
                }
                return Ok(());
            }
        }

        self.queue.enqueue_message_check(jid.as_str()).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use meshrelay_core::{Group, GroupFolder};
    use meshrelay_queue::{GroupDispatch, WorkItem};
    use meshrelay_store::SqliteStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDispatch {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GroupDispatch for CountingDispatch {
        async fn run(&self, _jid: &str, _item: WorkItem) -> meshrelay_queue::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Simulate a sandbox invocation that takes long enough for the
            // test to observe `is_active` returning true mid-flight.
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        }
    }

    async fn setup() -> (Arc<dyn Store>, Arc<SharedState>, Arc<GroupQueue>) {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
        let state = Arc::new(SharedState::new(store.clone()));
        let dispatch = Arc::new(CountingDispatch { calls: AtomicUsize::new(0) });
        let queue = Arc::new(GroupQueue::new(4, dispatch));
        (store, state, queue)
    }

    fn msg(jid: &str, id: &str, ts: &str, body: &str) -> Message {
        Message {
            id: id.to_string(),
            jid: Jid::from(jid),
            sender_id: "u1".to_string(),
            sender_display_name: Some("Alice".to_string()),
            timestamp: Timestamp::from(ts),
            body: body.to_string(),
            is_from_assistant: false,
        }
    }

    #[tokio::test]
    async fn triggered_group_enqueues_check() {
        let (store, state, queue) = setup().await;
        let group = Group {
            jid: Jid::from("tg:team"),
            display_name: "Team".to_string(),
            folder: GroupFolder::new("team").unwrap(),
            runtime_override: None,
            model_override: None,
            requires_trigger: true,
            trigger: "@A".to_string(),
            is_main: false,
        };
        store.set_registered_group(group.clone()).await.unwrap();
        state.reload().await.unwrap();

        store.store_message(&msg("tg:team", "1", "T1", "hello")).await.unwrap();
        store.store_message(&msg("tg:team", "2", "T2", "world")).await.unwrap();
        store.store_message(&msg("tg:team", "3", "T3", "@A recap")).await.unwrap();

        let mloop = MessageLoop::new(store, state, queue.clone(), Duration::from_millis(10));
        mloop.tick().await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(queue.is_active("tg:team").await);
    }

    #[tokio::test]
    async fn non_triggered_batch_is_skipped() {
        let (store, state, queue) = setup().await;
        let group = Group {
            jid: Jid::from("tg:team"),
            display_name: "Team".to_string(),
            folder: GroupFolder::new("team").unwrap(),
            runtime_override: None,
            model_override: None,
            requires_trigger: true,
            trigger: "@A".to_string(),
            is_main: false,
        };
        store.set_registered_group(group).await.unwrap();
        state.reload().await.unwrap();

        store.store_message(&msg("tg:team", "1", "T1", "hello")).await.unwrap();

        let mloop = MessageLoop::new(store, state, queue.clone(), Duration::from_millis(10));
        mloop.tick().await.unwrap();

        assert!(!queue.is_active("tg:team").await);
    }
}
