//! `POST /v1/admin/reload` — re-read the config on disk and rebuild the
//! intent parser and skill router without dropping in-flight requests.

use std::path::Path;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};

use cf_domain::config::Config;

use crate::state::AppState;

pub async fn reload(State(state): State<AppState>) -> axum::response::Response {
    let path = crate::cli::config_path();
    let config = match Config::load(Path::new(&path)) {
        Ok(config) => config,
        Err(e) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    let issues = config.validate();
    let errors: Vec<String> = issues
        .iter()
        .filter(|i| i.severity == cf_domain::config::ConfigSeverity::Error)
        .map(|i| i.to_string())
        .collect();
    if !errors.is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "error": "invalid config", "issues": errors })),
        )
            .into_response();
    }

    state.reload_routing(&config);
    Json(serde_json::json!({ "reloaded": true, "skills": state.registry.names() })).into_response()
}
