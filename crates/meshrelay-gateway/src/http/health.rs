//! `GET /healthz`, `GET /readyz` (§6 "HTTP surface").

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::app::AppState;

/// Liveness probe — the process is up and able to answer requests.
pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Readiness probe: store connectivity, registered group count, active
/// sandbox count, and which optional feature areas are enabled.
pub async fn readyz(State(state): State<Arc<AppState>>) -> Json<Value> {
    let orchestrator = &state.orchestrator;
    let store_ok = orchestrator.store().get_registered_groups().await.is_ok();
    let group_count = orchestrator.state().all_groups().await.len();
    let active_sandboxes = orchestrator.group_queue().active_count().await;
    let config = orchestrator.config();

    Json(json!({
        "status": if store_ok { "ready" } else { "degraded" },
        "store_connected": store_ok,
        "group_count": group_count,
        "active_sandboxes": active_sandboxes,
        "max_concurrent_sandboxes": config.orchestrator.max_concurrent_sandboxes,
        "features": {
            "scheduler": true,
            "query_adapter": !config.query_adapter.read_allowlist.is_empty()
                || !config.query_adapter.write_allowlist.is_empty(),
        },
    }))
}
