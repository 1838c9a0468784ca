use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::time::Duration;

use crate::app_state::AppState;

const WORKER_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub version: String,
    pub storage: &'static str,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub store: ComponentHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<ComponentHealth>,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

/// GET /healthz — dependency status: job store, storage backend, and the
/// remote worker when one is configured.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let start = std::time::Instant::now();
    let store_check = match state.store.ping().await {
        Ok(()) => ComponentHealth {
            status: "ok".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
        },
        Err(_) => ComponentHealth {
            status: "error".to_string(),
            latency_ms: None,
        },
    };

    let worker_check = match &state.worker_url {
        Some(worker_url) => Some(probe_worker(worker_url).await),
        None => None,
    };

    let ok = store_check.status == "ok";
    let status_code = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        ok,
        version: env!("CARGO_PKG_VERSION").to_string(),
        storage: state.storage.backend_name(),
        checks: HealthChecks {
            store: store_check,
            worker: worker_check,
        },
    };

    (status_code, Json(response))
}

async fn probe_worker(worker_url: &str) -> ComponentHealth {
    let start = std::time::Instant::now();
    let url = format!("{}/healthz", worker_url.trim_end_matches('/'));
    let result = async {
        let response = reqwest::Client::new()
            .get(&url)
            .timeout(WORKER_PROBE_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        response.json::<serde_json::Value>().await
    }
    .await;

    match result {
        Ok(body) if body.get("worker").and_then(|v| v.as_str()) == Some("ok") => ComponentHealth {
            status: "ok".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
        },
        Ok(_) => ComponentHealth {
            status: "unexpected response".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
        },
        Err(e) => ComponentHealth {
            status: format!("error: {e}"),
            latency_ms: None,
        },
    }
}
