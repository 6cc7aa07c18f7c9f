//! HTTP adapter boundary.

pub mod admin;
pub mod auth;
pub mod callbacks;
pub mod messages;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/messages", post(messages::handle))
        .route("/v1/callbacks", post(callbacks::handle))
        .route("/v1/admin/reload", post(admin::reload))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}
