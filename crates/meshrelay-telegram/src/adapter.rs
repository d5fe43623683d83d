//! Telegram adapter: a [`Channel`] implementation plus the long-poll ingest
//! loop that feeds the core's Store.

use async_trait::async_trait;
use dashmap::DashMap;
use meshrelay_channels::{error::ChannelError, error::Result as ChannelResult, Channel};
use meshrelay_core::Jid;
use teloxide::prelude::*;
use teloxide::types::{ChatId, MessageId};
use tracing::warn;

use crate::{send, typing::TypingHandle};

/// Telegram-specific adapter configuration (§6, channel-adapter plumbing).
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Entries permitted to interact with the bot — see [`crate::allow`].
    pub allow_users: Vec<String>,
    pub dm_allowed: bool,
    pub require_mention: bool,
    /// `@AssistantName` token used by [`crate::mention::normalize_mentions`].
    pub assistant_name: String,
}

/// JID prefix owned by this adapter.
pub const JID_PREFIX: &str = "tg:";

pub fn jid_for_chat(chat_id: ChatId) -> Jid {
    Jid::from(format!("{JID_PREFIX}{}", chat_id.0))
}

fn chat_id_from_jid(jid: &Jid) -> Option<ChatId> {
    jid.as_str()
        .strip_prefix(JID_PREFIX)
        .and_then(|s| s.parse::<i64>().ok())
        .map(ChatId)
}

/// Telegram [`Channel`] implementation. Wraps a teloxide `Bot`, which is
/// itself a cheap `Arc`-backed handle, so the adapter is cheap to share.
pub struct TelegramAdapter {
    bot: Bot,
    config: TelegramConfig,
    typing: DashMap<ChatId, TypingHandle>,
}

impl TelegramAdapter {
    pub fn new(config: TelegramConfig) -> Self {
        let bot = Bot::new(&config.bot_token);
        Self {
            bot,
            config,
            typing: DashMap::new(),
        }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    pub fn config(&self) -> &TelegramConfig {
        &self.config
    }
}

#[async_trait]
impl Channel for TelegramAdapter {
    fn name(&self) -> &str {
        "telegram"
    }

    fn owns(&self, jid: &Jid) -> bool {
        jid.as_str().starts_with(JID_PREFIX)
    }

    async fn send(&self, jid: &Jid, text: &str) -> ChannelResult<Option<String>> {
        let chat_id = chat_id_from_jid(jid)
            .ok_or_else(|| ChannelError::SendFailed(format!("not a telegram jid: {jid}")))?;
        let id = send::send_response(&self.bot, chat_id, text).await;
        Ok(id.map(|MessageId(raw)| raw.to_string()))
    }

    async fn edit(&self, jid: &Jid, message_id: &str, text: &str) -> ChannelResult<bool> {
        let chat_id = chat_id_from_jid(jid)
            .ok_or_else(|| ChannelError::EditFailed(format!("not a telegram jid: {jid}")))?;
        let raw: i32 = message_id
            .parse()
            .map_err(|_| ChannelError::EditFailed(format!("bad message id: {message_id}")))?;
        Ok(send::edit_response(&self.bot, chat_id, MessageId(raw), text).await)
    }

    async fn set_typing(&self, jid: &Jid, on: bool) -> ChannelResult<()> {
        let chat_id = chat_id_from_jid(jid)
            .ok_or_else(|| ChannelError::TypingFailed(format!("not a telegram jid: {jid}")))?;
        if on {
            self.typing
                .entry(chat_id)
                .or_insert_with(|| TypingHandle::start(self.bot.clone(), chat_id));
        } else if let Some((_, handle)) = self.typing.remove(&chat_id) {
            handle.stop();
        }
        Ok(())
    }

    fn max_message_len(&self) -> Option<usize> {
        Some(send::CHUNK_MAX)
    }
}

impl Drop for TelegramAdapter {
    fn drop(&mut self) {
        for entry in self.typing.iter() {
            warn!(
                chat_id = entry.key().0,
                "telegram adapter dropped with typing indicator still active"
            );
        }
    }
}
