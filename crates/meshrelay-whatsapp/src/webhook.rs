//! WhatsApp Cloud API webhook receiver: signature verification, challenge
//! handshake, and inbound-message normalization into the Store.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use hmac::{Hmac, Mac};
use meshrelay_core::{Jid, Message, Timestamp};
use meshrelay_store::Store;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::adapter::{jid_for_wa_id, WhatsAppConfig};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct WebhookState {
    pub store: Arc<dyn Store>,
    pub config: WhatsAppConfig,
}

#[derive(serde::Deserialize)]
pub struct ChallengeQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

/// `GET` handshake the Graph API performs once when the webhook URL is
/// registered.
pub async fn verify(
    State(state): State<WebhookState>,
    Query(q): Query<ChallengeQuery>,
) -> impl IntoResponse {
    match (q.mode.as_deref(), q.verify_token.as_deref(), q.challenge) {
        (Some("subscribe"), Some(token), Some(challenge)) if token == state.config.verify_token => {
            (StatusCode::OK, challenge).into_response()
        }
        _ => (StatusCode::FORBIDDEN, "verification failed").into_response(),
    }
}

/// `POST` delivery of inbound WhatsApp events.
pub async fn receive(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    if let Err(e) = verify_signature(&state.config.app_secret, &headers, &body) {
        warn!(error = %e, "whatsapp webhook: signature verification failed");
        return StatusCode::UNAUTHORIZED;
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "whatsapp webhook: malformed JSON");
            return StatusCode::BAD_REQUEST;
        }
    };

    for message in extract_messages(&payload) {
        if let Err(e) = state.store.store_message(&message).await {
            warn!(error = %e, "whatsapp webhook: failed to store inbound message");
        }
    }

    StatusCode::OK
}

fn verify_signature(app_secret: &str, headers: &HeaderMap, body: &[u8]) -> crate::error::Result<()> {
    let header = headers
        .get("X-Hub-Signature-256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let expected = header.strip_prefix("sha256=").unwrap_or("");

    let mut mac = HmacSha256::new_from_slice(app_secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(body);
    let computed = hex::encode(mac.finalize().into_bytes());

    if expected.is_empty() || !constant_time_eq(expected, &computed) {
        return Err(crate::error::WhatsAppError::BadSignature);
    }
    Ok(())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Walk the Cloud API's `entry[].changes[].value.messages[]` shape and
/// normalize each text message into the core [`Message`] type. Non-text
/// message types (images, status callbacks) are skipped — out of scope.
fn extract_messages(payload: &serde_json::Value) -> Vec<Message> {
    let mut out = Vec::new();
    let Some(entries) = payload.get("entry").and_then(|v| v.as_array()) else {
        return out;
    };
    for entry in entries {
        let Some(changes) = entry.get("changes").and_then(|v| v.as_array()) else {
            continue;
        };
        for change in changes {
            let Some(value) = change.get("value") else {
                continue;
            };
            let contacts = value.get("contacts").and_then(|v| v.as_array());
            let Some(messages) = value.get("messages").and_then(|v| v.as_array()) else {
                continue;
            };
            for msg in messages {
                let Some(wa_id) = msg.get("from").and_then(|v| v.as_str()) else {
                    continue;
                };
                let Some(body) = msg.pointer("/text/body").and_then(|v| v.as_str()) else {
                    debug!("whatsapp webhook: skipping non-text message");
                    continue;
                };
                let id = msg
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let sender_name = contacts
                    .and_then(|c| c.first())
                    .and_then(|c| c.pointer("/profile/name"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string);

                out.push(Message {
                    id,
                    jid: jid_for_wa_id(wa_id),
                    sender_id: wa_id.to_string(),
                    sender_display_name: sender_name,
                    timestamp: Timestamp::now(),
                    body: body.to_string(),
                    is_from_assistant: false,
                });
            }
        }
    }
    out
}
