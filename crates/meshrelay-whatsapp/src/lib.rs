//! WhatsApp Cloud API channel adapter: REST send via `reqwest`, inbound
//! delivery via an Axum webhook receiver (§6 Channel capability, §9 adapters
//! are thin collaborators).

pub mod adapter;
pub mod error;
pub mod webhook;

pub use adapter::{WhatsAppAdapter, WhatsAppConfig};
pub use error::WhatsAppError;
