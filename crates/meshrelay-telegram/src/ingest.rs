//! Long-polling ingest loop: normalizes inbound Telegram updates and writes
//! them to the Store. The core's Message Loop (§4.4) observes them from
//! there — this loop never talks to the queue or dispatch subsystems.

use std::sync::Arc;

use meshrelay_core::{Jid, Message, Timestamp};
use meshrelay_store::Store;
use teloxide::prelude::*;
use tracing::{debug, info, warn};

use crate::{adapter::jid_for_chat, allow, mention::normalize_mentions, TelegramConfig};

/// Drive the long-polling dispatcher until the process exits.
pub async fn run(bot: Bot, store: Arc<dyn Store>, config: TelegramConfig) {
    info!("telegram: starting long-polling ingest loop");

    let handler = Update::filter_message().endpoint(on_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![store, config])
        .default_handler(|_upd| async {})
        .build()
        .dispatch()
        .await;
}

async fn on_message(
    bot: Bot,
    msg: teloxide::types::Message,
    store: Arc<dyn Store>,
    config: TelegramConfig,
) -> ResponseResult<()> {
    if msg.from.as_ref().map(|u| u.is_bot).unwrap_or(false) {
        return Ok(());
    }
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    let username = from.username.as_deref().unwrap_or("");
    let user_id = from.id.0.to_string();

    if !allow::is_allowed(&config.allow_users, username, &user_id) {
        debug!(user_id, "telegram: rejected by allowlist");
        return Ok(());
    }
    if msg.chat.is_private() && !config.dm_allowed {
        return Ok(());
    }

    let mut text = msg.text().or(msg.caption()).unwrap_or("").to_string();
    if text.is_empty() {
        return Ok(());
    }

    if msg.chat.is_group() || msg.chat.is_supergroup() {
        let bot_username = bot
            .get_me()
            .await
            .ok()
            .and_then(|me| me.user.username.clone())
            .unwrap_or_default();
        text = normalize_mentions(&text, &bot_username, &config.assistant_name);
        if config.require_mention && !text.starts_with(&format!("@{}", config.assistant_name)) {
            return Ok(());
        }
    }

    let jid = jid_for_chat(msg.chat.id);
    let sender_name = from
        .username
        .clone()
        .or_else(|| Some(from.first_name.clone()));
    let display_name = msg.chat.title().map(str::to_string).or(sender_name.clone());

    let message = Message {
        id: msg.id.0.to_string(),
        jid: jid.clone(),
        sender_id: user_id,
        sender_display_name: sender_name,
        timestamp: Timestamp::now(),
        body: text,
        is_from_assistant: false,
    };

    if let Err(e) = store.store_message(&message).await {
        warn!(error = %e, "telegram: failed to store inbound message");
        return Ok(());
    }
    if let Some(name) = display_name {
        let _ = store.store_chat_metadata(&jid, &name).await;
    }

    Ok(())
}
