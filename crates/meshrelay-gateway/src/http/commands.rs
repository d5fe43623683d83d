//! `POST /v1/commands` (§6, §4.7): parses a builtin command, applies its
//! effects through the Orchestrator, and returns the reply text.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use meshrelay_core::Jid;
use meshrelay_dispatch::handle_command;
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub jid: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct CommandApiResponse {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<String>,
    pub recognized: bool,
}

/// `POST /v1/commands` (§6 "command text → `{text, parse_mode?, effects[]}`").
/// Effects are applied here rather than returned to the caller — the HTTP
/// surface only needs to hand back the reply text.
pub async fn commands(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CommandRequest>,
) -> Result<Json<CommandApiResponse>, ApiError> {
    let orchestrator = &state.orchestrator;
    let jid = Jid::from(req.jid.as_str());

    let Some(group) = orchestrator.state().get_group(&jid).await else {
        return Err(ApiError::not_found(format!("jid {} is not a registered group", req.jid)));
    };

    let reported_model = orchestrator.state().reported_model(&group.folder).await;
    let Some(response) = handle_command(&req.text, &group, reported_model.as_deref(), orchestrator.catalog()) else {
        return Ok(Json(CommandApiResponse { text: format!("unrecognized command: {}", req.text), parse_mode: None, recognized: false }));
    };

    for effect in response.effects {
        orchestrator.apply_command_effect(effect).await?;
    }

    Ok(Json(CommandApiResponse { text: response.text, parse_mode: response.parse_mode, recognized: true }))
}
