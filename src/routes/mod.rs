use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::app_state::AppState;

pub mod health;
pub mod jobs;
pub mod metrics;

/// Paths exempt from the shared-secret check: health probes, local asset
/// serving, and the metrics scrape endpoint.
fn path_is_public(path: &str) -> bool {
    path == "/healthz" || path == "/metrics" || path == "/assets" || path.starts_with("/assets/")
}

/// Constant-time string comparison for the shared secret.
fn secrets_equal(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Shared-secret auth middleware. With no key configured, auth is disabled.
pub async fn require_api_key(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(req).await;
    };
    if path_is_public(req.uri().path()) {
        return next.run(req).await;
    }

    let provided = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok());
    match provided {
        Some(key) if secrets_equal(key, expected) => next.run(req).await,
        Some(_) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid API key" })),
        )
            .into_response(),
        None => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "missing API key" })),
        )
            .into_response(),
    }
}
