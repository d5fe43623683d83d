use thiserror::Error;

/// Errors surfaced by a [`Channel`](crate::channel::Channel) implementation.
///
/// The core treats every variant as a transient failure of the affected
/// outbound call (§7) — it never inspects the variant to change its own
/// control flow, only logs it.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("edit failed: {0}")]
    EditFailed(String),

    #[error("typing indicator failed: {0}")]
    TypingFailed(String),

    #[error("channel not registered: {0}")]
    Unregistered(String),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
