//! `POST /v1/ingress` (§6): normalizes an inbound message from a channel
//! adapter that prefers HTTP over a direct `Store` dependency, resolves the
//! owning group, runs the same trigger test the Message Loop applies on its
//! next poll tick, and accepts/rejects accordingly. Accepted messages are
//! stored immediately — the Message Loop picks them up on its next tick
//! exactly as if a direct-`Store` adapter had written them (§4.4).

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use meshrelay_core::{Jid, Message, Timestamp};
use meshrelay_dispatch::trigger::matches_trigger;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct IngressRequest {
    pub jid: String,
    pub sender_id: String,
    #[serde(default)]
    pub sender_display_name: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    pub body: String,
    #[serde(default)]
    pub is_from_assistant: bool,
}

#[derive(Debug, Serialize)]
pub struct IngressResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl IngressResponse {
    fn rejected(reason: impl Into<String>) -> Self {
        Self { accepted: false, reason: Some(reason.into()) }
    }

    fn accepted() -> Self {
        Self { accepted: true, reason: None }
    }
}

/// `POST /v1/ingress` (§6 "normalize + accept/reject an inbound message").
pub async fn ingress(State(state): State<Arc<AppState>>, Json(req): Json<IngressRequest>) -> Json<IngressResponse> {
    let orchestrator = &state.orchestrator;
    let jid = Jid::from(req.jid.as_str());

    let Some(group) = orchestrator.state().get_group(&jid).await else {
        return Json(IngressResponse::rejected("jid is not a registered group"));
    };

    if !group.is_main && group.requires_trigger && !matches_trigger(&req.body, &group.trigger) {
        return Json(IngressResponse::rejected("message does not match the group's trigger"));
    }

    let message = Message {
        id: uuid::Uuid::new_v4().to_string(),
        jid: jid.clone(),
        sender_id: req.sender_id,
        sender_display_name: req.sender_display_name.clone(),
        timestamp: req.timestamp.map(|t| Timestamp::from(t.as_str())).unwrap_or_else(Timestamp::now),
        body: req.body,
        is_from_assistant: req.is_from_assistant,
    };

    if let Err(e) = orchestrator.store().store_message(&message).await {
        warn!(error = %e, %jid, "ingress: failed to store inbound message");
        return Json(IngressResponse::rejected("store failure"));
    }
    if let Some(name) = req.sender_display_name.as_deref() {
        let _ = orchestrator.store().store_chat_metadata(&jid, name).await;
    }

    Json(IngressResponse::accepted())
}
