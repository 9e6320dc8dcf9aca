use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::app::AppState;

/// GET /health — liveness probe.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "active_workers": state.supervisor.active_worker_count(),
    }))
}

/// GET /status — the §6 management-API status snapshot. The HTTP/SSE
/// transport proper (CRUD over agents/memories/soul files, the
/// `config_reloaded` event stream) is an external collaborator; this
/// endpoint exposes only the payload shape vespra-core already defines.
pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = state.config_store.get();
    let snapshot = state.supervisor.status_snapshot(&config);
    Json(serde_json::to_value(snapshot).unwrap_or_else(|_| json!({})))
}
