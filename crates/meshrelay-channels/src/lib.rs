//! The `Channel` capability (§6): the core's only view onto a chat channel.
//!
//! Adapters (Telegram, WhatsApp, …) implement [`Channel`] and register with
//! a [`ChannelManager`]; everything about receiving messages, platform SDKs,
//! and webhook plumbing lives in the adapter crate, not here.

pub mod channel;
pub mod error;
pub mod manager;

pub use channel::Channel;
pub use error::ChannelError;
pub use manager::ChannelManager;
