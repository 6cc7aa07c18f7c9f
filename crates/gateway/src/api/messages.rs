//! `POST /v1/messages` — the inbound user-message endpoint.
//!
//! Verifies the adapter signature, applies the backpressure bound, runs
//! the pipeline, and returns the rendered response. Over-capacity
//! requests get a retryable 429 — the core never buffers unbounded work.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use cf_domain::types::RenderedResponse;

use crate::api::auth::verify_signature;
use crate::runtime::{handle_message, MessageInput};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MessageEnvelope {
    pub open_id: String,
    #[serde(default)]
    pub user_name: String,
    pub text: String,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    /// `"direct"` or `"group"`.
    #[serde(default = "d_direct")]
    pub chat_type: String,
}

fn d_direct() -> String {
    "direct".into()
}

pub async fn handle(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let signature = headers.get("x-signature").and_then(|v| v.to_str().ok());
    if !verify_signature(state.signing_secret.as_deref(), &body, signature) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "bad signature" })),
        )
            .into_response();
    }

    let envelope: MessageEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": format!("bad envelope: {e}") })),
            )
                .into_response();
        }
    };

    // Backpressure: reject with a retryable error when saturated.
    let Ok(_permit) = state.in_flight.clone().try_acquire_owned() else {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({ "error": "busy", "retryable": true })),
        )
            .into_response();
    };

    let input = MessageInput {
        open_id: envelope.open_id,
        user_name: envelope.user_name,
        text: envelope.text,
        event_id: envelope.event_id,
        chat_id: envelope.chat_id,
        is_group_chat: envelope.chat_type == "group",
    };

    // Request deadline: dropping the pipeline future aborts any in-flight
    // external call and releases the user lock. Parked pending state is
    // untouched, so a later callback within its TTL is still valid.
    let deadline = std::time::Duration::from_millis(state.config.server.request_timeout_ms);
    let response: RenderedResponse =
        match tokio::time::timeout(deadline, handle_message(&state, input)).await {
            Ok(response) => response,
            Err(_) => RenderedResponse::text(cf_domain::messages::user_message("timeout")),
        };
    Json(response).into_response()
}
