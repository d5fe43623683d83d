use std::collections::HashMap;
use std::sync::Arc;

use meshrelay_core::{Group, GroupFolder, Jid, Timestamp};
use meshrelay_store::Store;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::error::Result;

const LAST_SEEN_TS_KEY: &str = "last_seen_ts";

fn last_agent_ts_key(jid: &Jid) -> String {
    format!("last_agent_ts:{}", jid.as_str())
}

/// Process-wide state held behind read/write locks (§4.7), backed by the
/// durable [`Store`]: reads come from memory, writes go to both.
///
/// `groups`, `sessions`, `last_seen_ts`/`last_agent_ts`, and
/// `reported_models` are exactly the five maps §4.7 names. There is one
/// `SharedState` per process, constructed once at startup and handed to
/// every subsystem as an `Arc`.
pub struct SharedState {
    store: Arc<dyn Store>,
    groups: RwLock<HashMap<Jid, Group>>,
    sessions: RwLock<HashMap<GroupFolder, String>>,
    last_seen_ts: RwLock<Option<Timestamp>>,
    last_agent_ts: RwLock<HashMap<Jid, Timestamp>>,
    reported_models: RwLock<HashMap<GroupFolder, String>>,
}

impl SharedState {
    /// Construct empty state. Call [`SharedState::reload`] to populate it
    /// from the Store before serving traffic.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            groups: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            last_seen_ts: RwLock::new(None),
            last_agent_ts: RwLock::new(HashMap::new()),
            reported_models: RwLock::new(HashMap::new()),
        }
    }

    /// Load `groups` and `sessions` from the Store, and the global
    /// `last_seen_ts` cursor. Per-group `last_agent_ts` is loaded lazily
    /// per-JID on first access since it has no natural "list all" query.
    #[instrument(skip(self))]
    pub async fn reload(&self) -> Result<()> {
        let groups = self.store.get_registered_groups().await?;
        let mut g = self.groups.write().await;
        g.clear();
        for group in groups {
            g.insert(group.jid.clone(), group);
        }
        drop(g);

        let sessions = self.store.get_all_sessions().await?;
        *self.sessions.write().await = sessions;

        if let Some(ts) = self.store.get_router_state(LAST_SEEN_TS_KEY).await? {
            *self.last_seen_ts.write().await = Some(Timestamp::from(ts));
        }

        debug!("shared state reloaded from store");
        Ok(())
    }

    // -- groups ---------------------------------------------------------

    pub async fn get_group(&self, jid: &Jid) -> Option<Group> {
        self.groups.read().await.get(jid).cloned()
    }

    pub async fn all_groups(&self) -> Vec<Group> {
        self.groups.read().await.values().cloned().collect()
    }

    pub async fn group_by_folder(&self, folder: &GroupFolder) -> Option<Group> {
        self.groups
            .read()
            .await
            .values()
            .find(|g| &g.folder == folder)
            .cloned()
    }

    /// Register (or update) a group: writes through to the Store and the
    /// in-memory map. Called by the `register_group` IPC effect and by
    /// model-switch commands (§4.7).
    #[instrument(skip(self, group), fields(jid = %group.jid, folder = %group.folder))]
    pub async fn upsert_group(&self, group: Group) -> Result<()> {
        self.store.set_registered_group(group.clone()).await?;
        self.groups.write().await.insert(group.jid.clone(), group);
        Ok(())
    }

    pub async fn main_group_folder(&self) -> Option<GroupFolder> {
        self.groups
            .read()
            .await
            .values()
            .find(|g| g.is_main)
            .map(|g| g.folder.clone())
    }

    // -- sessions ---------------------------------------------------------

    pub async fn get_session(&self, folder: &GroupFolder) -> Option<String> {
        self.sessions.read().await.get(folder).cloned()
    }

    /// Record a session id reported by the sandbox (`new_session_id`, §4.2).
    #[instrument(skip(self, session_id), fields(folder = %folder))]
    pub async fn set_session(&self, folder: &GroupFolder, session_id: String) -> Result<()> {
        self.store.set_session(folder, &session_id).await?;
        self.sessions.write().await.insert(folder.clone(), session_id);
        Ok(())
    }

    /// `/reset` and model-switch effect: clear both the durable and
    /// in-memory session entry (§4.7 `ClearSession`).
    #[instrument(skip(self), fields(folder = %folder))]
    pub async fn clear_session(&self, folder: &GroupFolder) -> Result<()> {
        self.store.delete_session(folder).await?;
        self.sessions.write().await.remove(folder);
        Ok(())
    }

    // -- cursors ---------------------------------------------------------

    pub async fn last_seen_ts(&self) -> Option<Timestamp> {
        self.last_seen_ts.read().await.clone()
    }

    /// Advance the global cursor. Never decreases (§3, §8 cursor-monotonicity
    /// invariant) — a candidate timestamp that is not strictly greater than
    /// the current value is silently ignored rather than rejected, since
    /// callers pass "the latest timestamp seen this tick" which may equal
    /// the stored value when nothing new arrived.
    #[instrument(skip(self), fields(candidate = %candidate))]
    pub async fn advance_last_seen(&self, candidate: Timestamp) -> Result<()> {
        let mut guard = self.last_seen_ts.write().await;
        if guard.as_ref().is_some_and(|cur| *cur >= candidate) {
            return Ok(());
        }
        self.store
            .set_router_state(LAST_SEEN_TS_KEY, candidate.as_str())
            .await?;
        *guard = Some(candidate);
        Ok(())
    }

    pub async fn last_agent_ts(&self, jid: &Jid) -> Result<Option<Timestamp>> {
        if let Some(ts) = self.last_agent_ts.read().await.get(jid) {
            return Ok(Some(ts.clone()));
        }
        let loaded = self.store.get_router_state(&last_agent_ts_key(jid)).await?;
        if let Some(ts) = &loaded {
            self.last_agent_ts
                .write()
                .await
                .insert(jid.clone(), Timestamp::from(ts.as_str()));
        }
        Ok(loaded.map(Timestamp::from))
    }

    /// Set the per-group cursor. Unlike `last_seen_ts` this one *can*
    /// roll back (§3, §4.4: on sandbox failure with no delivered output),
    /// so no monotonicity is enforced here — the caller decides direction.
    #[instrument(skip(self), fields(jid = %jid, ts = %ts))]
    pub async fn set_last_agent_ts(&self, jid: &Jid, ts: Timestamp) -> Result<()> {
        self.store
            .set_router_state(&last_agent_ts_key(jid), ts.as_str())
            .await?;
        self.last_agent_ts.write().await.insert(jid.clone(), ts);
        Ok(())
    }

    // -- reported models ---------------------------------------------------

    pub async fn reported_model(&self, folder: &GroupFolder) -> Option<String> {
        self.reported_models.read().await.get(folder).cloned()
    }

    pub async fn set_reported_model(&self, folder: &GroupFolder, model: String) {
        self.reported_models.write().await.insert(folder.clone(), model);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshrelay_store::SqliteStore;

    fn group(jid: &str, folder: &str) -> Group {
        Group::new_main(Jid::from(jid), "Main", GroupFolder::new(folder).unwrap())
    }

    #[tokio::test]
    async fn reload_populates_groups_and_sessions() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
        store.set_registered_group(group("tg:1", "main")).await.unwrap();
        store
            .set_session(&GroupFolder::new("main").unwrap(), "sess-1")
            .await
            .unwrap();

        let state = SharedState::new(store);
        state.reload().await.unwrap();

        assert!(state.get_group(&Jid::from("tg:1")).await.is_some());
        assert_eq!(
            state.get_session(&GroupFolder::new("main").unwrap()).await.as_deref(),
            Some("sess-1")
        );
    }

    #[tokio::test]
    async fn last_seen_never_decreases() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
        let state = SharedState::new(store);

        state.advance_last_seen(Timestamp::from("T2")).await.unwrap();
        state.advance_last_seen(Timestamp::from("T1")).await.unwrap();

        assert_eq!(state.last_seen_ts().await.unwrap().as_str(), "T2");
    }

    #[tokio::test]
    async fn last_agent_ts_can_roll_back() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
        let state = SharedState::new(store);
        let jid = Jid::from("tg:1");

        state.set_last_agent_ts(&jid, Timestamp::from("T2")).await.unwrap();
        state.set_last_agent_ts(&jid, Timestamp::from("T1")).await.unwrap();

        assert_eq!(state.last_agent_ts(&jid).await.unwrap().unwrap().as_str(), "T1");
    }

    #[tokio::test]
    async fn clear_session_removes_entry() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
        let state = SharedState::new(store);
        let folder = GroupFolder::new("main").unwrap();

        state.set_session(&folder, "sess-1".to_string()).await.unwrap();
        assert!(state.get_session(&folder).await.is_some());

        state.clear_session(&folder).await.unwrap();
        assert!(state.get_session(&folder).await.is_none());
    }
}
