//! `POST /v1/send`, `POST /v1/edit` (§6): delegates outbound delivery to
//! the `ChannelManager` when a channel adapter wants the core to own
//! chunking/persistence instead of calling the adapter SDK directly.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use meshrelay_core::Jid;
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub jid: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub message_id: Option<String>,
}

pub async fn send(State(state): State<Arc<AppState>>, Json(req): Json<SendRequest>) -> Result<Json<SendResponse>, ApiError> {
    if req.text.is_empty() {
        return Err(ApiError::bad_request("text must not be empty"));
    }
    let jid = Jid::from(req.jid.as_str());
    let message_id = state.orchestrator.channels().send(&jid, &req.text).await?;
    Ok(Json(SendResponse { message_id }))
}

#[derive(Debug, Deserialize)]
pub struct EditRequest {
    pub jid: String,
    pub message_id: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct EditResponse {
    pub ok: bool,
}

pub async fn edit(State(state): State<Arc<AppState>>, Json(req): Json<EditRequest>) -> Result<Json<EditResponse>, ApiError> {
    let jid = Jid::from(req.jid.as_str());
    let ok = state.orchestrator.channels().edit(&jid, &req.message_id, &req.text).await?;
    Ok(Json(EditResponse { ok }))
}
