//! Boardlog relay server.
//!
//! Keeps one authoritative action log per session, assigns sequence numbers,
//! fans appended actions out to the other participants and serves the full
//! log for catch-up.

pub mod api;
pub mod config;
pub mod state;
pub mod ws;

use axum::{
    Router,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use config::ServerConfig;
pub use state::AppState;

/// Build the router for `state`.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(api::health))
        .route(
            "/session/{id}/actions",
            get(api::list_actions).post(api::append_action),
        )
        .route("/session/{id}", delete(api::end_session))
        .route("/session/{id}/save-template", post(api::save_template))
        .route("/session/{id}/templates", get(api::list_templates))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Index page
async fn index() -> &'static str {
    "Boardlog Relay Server - Connect via WebSocket at /ws"
}
