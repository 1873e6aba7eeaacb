use axum::Router;
use axum::extract::State;
use axum::routing::get;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;
use crate::ws;

/// Build the gateway router: status, health and the extension websocket.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/health", get(health))
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn status(State(state): State<SharedState>) -> axum::Json<serde_json::Value> {
    axum::Json(json!({
        "name": "tabpilot",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "extension_connected": state.transport.is_connected(),
        "sessions": state.sessions.len(),
        "pending_browser_commands": state.transport.pending_commands(),
    }))
}
