//! Shared state handed to every Axum handler (§6 "HTTP surface").

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use meshrelay_dispatch::Orchestrator;

/// Thin wrapper around the [`Orchestrator`] — the gateway carries no state
/// of its own beyond what the Orchestrator already owns (Store, SharedState,
/// ChannelManager, Group Queue).
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// Assembles the full Axum router (§6 "HTTP surface").
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(crate::http::health::healthz))
        .route("/readyz", get(crate::http::health::readyz))
        .route("/v1/ingress", post(crate::http::ingress::ingress))
        .route("/v1/send", post(crate::http::send::send))
        .route("/v1/edit", post(crate::http::send::edit))
        .route("/v1/commands", post(crate::http::commands::commands))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
