//! WhatsApp Cloud API [`Channel`] implementation.
//!
//! Outbound delivery goes straight to the Graph API's `/messages` endpoint
//! over `reqwest` — there is no official WhatsApp Rust SDK, so the corpus's
//! own convention for chat backends with no dedicated crate (plain REST +
//! webhook) is followed here (see `sven-channels`' reqwest-based adapters).

use async_trait::async_trait;
use meshrelay_channels::{error::ChannelError, error::Result as ChannelResult, Channel};
use meshrelay_core::Jid;
use tracing::warn;

const GRAPH_API_BASE: &str = "https://graph.facebook.com/v19.0";
/// WhatsApp Cloud API text body limit.
const MAX_TEXT_LEN: usize = 4096;

#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub access_token: String,
    pub phone_number_id: String,
    /// Shared secret used to verify `X-Hub-Signature-256` on inbound webhooks.
    pub app_secret: String,
    /// Token the Graph API challenge-verification GET request must echo back.
    pub verify_token: String,
}

/// JID prefix owned by this adapter.
pub const JID_PREFIX: &str = "wa:";

pub fn jid_for_wa_id(wa_id: &str) -> Jid {
    Jid::from(format!("{JID_PREFIX}{wa_id}"))
}

fn wa_id_from_jid(jid: &Jid) -> Option<&str> {
    jid.as_str().strip_prefix(JID_PREFIX)
}

pub struct WhatsAppAdapter {
    http: reqwest::Client,
    config: WhatsAppConfig,
}

impl WhatsAppAdapter {
    pub fn new(config: WhatsAppConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &WhatsAppConfig {
        &self.config
    }

    fn messages_url(&self) -> String {
        format!(
            "{GRAPH_API_BASE}/{}/messages",
            self.config.phone_number_id
        )
    }
}

#[async_trait]
impl Channel for WhatsAppAdapter {
    fn name(&self) -> &str {
        "whatsapp"
    }

    fn owns(&self, jid: &Jid) -> bool {
        jid.as_str().starts_with(JID_PREFIX)
    }

    async fn send(&self, jid: &Jid, text: &str) -> ChannelResult<Option<String>> {
        let wa_id = wa_id_from_jid(jid)
            .ok_or_else(|| ChannelError::SendFailed(format!("not a whatsapp jid: {jid}")))?;

        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": wa_id,
            "type": "text",
            "text": { "body": truncate(text, MAX_TEXT_LEN) },
        });

        let resp = self
            .http
            .post(self.messages_url())
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            warn!(status, %body, "whatsapp: send failed");
            return Err(ChannelError::SendFailed(format!("{status}: {body}")));
        }

        let parsed: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        let id = parsed
            .pointer("/messages/0/id")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Ok(id)
    }

    /// The Cloud API has no message-edit endpoint: a sent message is
    /// immutable. `finalize` (§4.6) falls back to a single plain send.
    async fn edit(&self, _jid: &Jid, _message_id: &str, _text: &str) -> ChannelResult<bool> {
        Ok(false)
    }

    /// No typing-indicator endpoint in the Cloud API either; best-effort no-op.
    async fn set_typing(&self, _jid: &Jid, _on: bool) -> ChannelResult<()> {
        Ok(())
    }

    fn supports_edit(&self) -> bool {
        false
    }

    fn max_message_len(&self) -> Option<usize> {
        Some(MAX_TEXT_LEN)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        s
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    }
}
