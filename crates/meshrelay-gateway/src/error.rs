//! Maps collaborator errors onto HTTP responses for the `/v1/*` surface
//! (§6, §7 "Permanent" errors refuse and surface a human-readable message).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<meshrelay_channels::ChannelError> for ApiError {
    fn from(e: meshrelay_channels::ChannelError) -> Self {
        Self { status: StatusCode::BAD_GATEWAY, message: e.to_string() }
    }
}

impl From<meshrelay_store::StoreError> for ApiError {
    fn from(e: meshrelay_store::StoreError) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: e.to_string() }
    }
}

impl From<meshrelay_dispatch::DispatchError> for ApiError {
    fn from(e: meshrelay_dispatch::DispatchError) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: e.to_string() }
    }
}
