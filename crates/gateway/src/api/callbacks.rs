//! `POST /v1/callbacks` — the card-callback endpoint.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use crate::api::auth::verify_signature;
use crate::runtime::callback::{BatchProgress, ProgressEmitter};
use crate::runtime::{handle_callback, CallbackInput};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CallbackEnvelope {
    pub open_id: String,
    #[serde(default)]
    pub user_name: String,
    pub callback_action: String,
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default = "d_direct")]
    pub chat_type: String,
}

fn d_direct() -> String {
    "direct".into()
}

/// Progress events surface as structured logs; a streaming adapter can
/// subscribe to them from the log pipeline.
struct LogProgressEmitter;

impl ProgressEmitter for LogProgressEmitter {
    fn emit(&self, user_id: &str, event: BatchProgress) {
        match event {
            BatchProgress::Start { total } => {
                tracing::info!(user_id, total, "batch started");
            }
            BatchProgress::Complete { succeeded, failed } => {
                tracing::info!(user_id, succeeded, failed, "batch complete");
            }
        }
    }
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

    let envelope: CallbackEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": format!("bad envelope: {e}") })),
            )
                .into_response();
        }
    };

    let Ok(_permit) = state.in_flight.clone().try_acquire_owned() else {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({ "error": "busy", "retryable": true })),
        )
            .into_response();
    };

    let input = CallbackInput {
        open_id: envelope.open_id,
        user_name: envelope.user_name,
        callback_action: envelope.callback_action,
        value: envelope.value,
        chat_id: envelope.chat_id,
        is_group_chat: envelope.chat_type == "group",
    };

    let emitter = LogProgressEmitter;
    let deadline = std::time::Duration::from_millis(state.config.server.request_timeout_ms);
    let response =
        match tokio::time::timeout(deadline, handle_callback(&state, input, Some(&emitter))).await
        {
            Ok(response) => response,
            Err(_) => cf_domain::types::RenderedResponse::text(
                cf_domain::messages::user_message("timeout"),
            ),
        };
    Json(response).into_response()
}
