use std::sync::Arc;

use dashmap::DashMap;
use meshrelay_core::Jid;
use tracing::warn;

use crate::{channel::Channel, error::ChannelError, error::Result};

/// Registry of every connected channel adapter, keyed by [`Channel::name`].
///
/// Routing a `send`/`edit`/`set_typing` call to the right adapter is done by
/// [`Channel::owns`] rather than by a static channel-name prefix table, so a
/// new adapter only needs to register itself — the manager never special-
/// cases a channel name.
#[derive(Default)]
pub struct ChannelManager {
    channels: DashMap<String, Arc<dyn Channel>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, channel: Arc<dyn Channel>) {
        self.channels.insert(channel.name().to_string(), channel);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Channel>> {
        self.channels.get(name).map(|c| c.clone())
    }

    /// Resolve the adapter that owns `jid`, if any is registered.
    pub fn owner_of(&self, jid: &Jid) -> Option<Arc<dyn Channel>> {
        self.channels
            .iter()
            .map(|entry| entry.value().clone())
            .find(|ch| ch.owns(jid))
    }

    pub async fn send(&self, jid: &Jid, text: &str) -> Result<Option<String>> {
        let channel = self.require_owner(jid)?;
        channel.send(jid, text).await
    }

    pub async fn edit(&self, jid: &Jid, message_id: &str, text: &str) -> Result<bool> {
        let channel = self.require_owner(jid)?;
        channel.edit(jid, message_id, text).await
    }

    pub async fn set_typing(&self, jid: &Jid, on: bool) -> Result<()> {
        let channel = self.require_owner(jid)?;
        channel.set_typing(jid, on).await
    }

    fn require_owner(&self, jid: &Jid) -> Result<Arc<dyn Channel>> {
        self.owner_of(jid).ok_or_else(|| {
            warn!(%jid, "no channel adapter owns this jid");
            ChannelError::Unregistered(jid.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FakeChannel {
        prefix: &'static str,
        name: &'static str,
    }

    #[async_trait]
    impl Channel for FakeChannel {
        fn name(&self) -> &str {
            self.name
        }
        fn owns(&self, jid: &Jid) -> bool {
            jid.as_str().starts_with(self.prefix)
        }
        async fn send(&self, _jid: &Jid, _text: &str) -> Result<Option<String>> {
            Ok(Some("msg-1".to_string()))
        }
        async fn edit(&self, _jid: &Jid, _id: &str, _text: &str) -> Result<bool> {
            Ok(true)
        }
        async fn set_typing(&self, _jid: &Jid, _on: bool) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn routes_by_owns() {
        let mgr = ChannelManager::new();
        mgr.register(Arc::new(FakeChannel { prefix: "tg:", name: "telegram" }));
        mgr.register(Arc::new(FakeChannel { prefix: "wa:", name: "whatsapp" }));

        let id = mgr.send(&Jid::from("tg:1"), "hi").await.unwrap();
        assert_eq!(id.as_deref(), Some("msg-1"));
        assert_eq!(mgr.owner_of(&Jid::from("wa:1")).unwrap().name(), "whatsapp");
    }

    #[tokio::test]
    async fn unregistered_jid_errors() {
        let mgr = ChannelManager::new();
        let err = mgr.send(&Jid::from("sig:1"), "hi").await.unwrap_err();
        assert!(matches!(err, ChannelError::Unregistered(_)));
    }
}
