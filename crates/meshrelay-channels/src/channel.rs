use async_trait::async_trait;
use meshrelay_core::Jid;

use crate::error::Result;

/// The abstract outbound capability the core consumes from a chat channel
/// (§6 "Channel capability"). Everything about *receiving* messages —
/// webhooks, polling, platform SDKs — is the adapter's own business; the
/// core only ever calls these four methods.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable lowercase identifier for this channel (e.g. `"telegram"`),
    /// used as the registry key inside [`ChannelManager`](crate::manager::ChannelManager).
    fn name(&self) -> &str;

    /// Whether this adapter is responsible for `jid` (channel-scoped prefix
    /// match, e.g. `tg:` vs `wa:`). The manager uses this to route a send/edit
    /// to the right adapter without the core knowing the channel taxonomy.
    fn owns(&self, jid: &Jid) -> bool;

    /// Send `text` to `jid`. Returns the channel-native message id on
    /// success, so the Stream Accumulator (§4.6) can later `edit` it.
    async fn send(&self, jid: &Jid, text: &str) -> Result<Option<String>>;

    /// Replace the content of a previously-sent message. Returns `false`
    /// (not an error) when the channel has no editing capability at all —
    /// callers fall back to a plain `send` in that case.
    async fn edit(&self, jid: &Jid, message_id: &str, text: &str) -> Result<bool>;

    /// Toggle the channel-native "typing…" indicator, best-effort.
    async fn set_typing(&self, jid: &Jid, on: bool) -> Result<()>;

    /// Whether `edit` is meaningfully supported (vs. a no-op `Ok(false)`).
    /// The Stream Accumulator (§4.6) consults this once per invocation
    /// instead of probing with a throwaway edit call.
    fn supports_edit(&self) -> bool {
        true
    }

    /// Channel-specific maximum message length, if bounded. `finalize`
    /// (§4.6) falls back to a plain send of the clean text when content
    /// would exceed this.
    fn max_message_len(&self) -> Option<usize> {
        None
    }
}
