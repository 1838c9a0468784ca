//! Remote mesh worker.
//!
//! Accepts dispatch requests from the orchestrator, fetches the input photo
//! (behind the SSRF guard), runs the provider fallback chain, uploads the
//! resulting mesh back through the orchestrator's dev upload endpoint, and
//! reports completion or failure via the callback URL. Failures are reported,
//! never raised; the worker process stays up.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;
use url::Url;

use photomesh::config::AppConfig;
use photomesh::models::api::{ProcessRequest, WorkerCallback};
use photomesh::services::provider::{ProviderError, ProviderRegistry};
use photomesh::services::ssrf::{self, GuardError};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(600);
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Clone)]
struct WorkerState {
    http: reqwest::Client,
    providers: Arc<ProviderRegistry>,
    api_key: Option<String>,
}

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting photomesh worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    let state = WorkerState {
        http: reqwest::Client::new(),
        providers: Arc::new(ProviderRegistry::with_defaults()),
        api_key: config.backend_api_key.clone(),
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/process", post(process))
        .with_state(state);

    tracing::info!("Worker listening on {}", config.worker_bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.worker_bind_addr)
        .await
        .expect("Failed to bind to address");
    axum::serve(listener, app).await.expect("Server error");
}

async fn healthz() -> Json<Value> {
    Json(json!({ "worker": "ok" }))
}

/// POST /process — accept a job and run it in the background so the
/// orchestrator's dispatch call returns promptly.
async fn process(State(state): State<WorkerState>, Json(request): Json<ProcessRequest>) -> Json<Value> {
    let job_id = request.job_id.clone();
    tokio::spawn(run_job(state, request));
    Json(json!({ "ok": true, "job_id": job_id, "status": "processing" }))
}

async fn run_job(state: WorkerState, request: ProcessRequest) {
    let job_id = request.job_id.clone();
    tracing::info!(
        %job_id,
        provider = request.provider.as_deref().unwrap_or("default"),
        "processing job"
    );

    let callback = match run_job_inner(&state, &request).await {
        Ok((output_key, provider_used)) => {
            tracing::info!(%job_id, %output_key, provider_used, "job succeeded");
            WorkerCallback::Completed {
                output_key: Some(output_key),
                provider_used: Some(provider_used.to_string()),
            }
        }
        Err(e) => {
            tracing::error!(%job_id, error = %e, "job failed");
            WorkerCallback::Failed {
                error: e.to_string(),
            }
        }
    };

    if let Some(callback_url) = &request.callback_url {
        send_callback(&state, callback_url, &callback).await;
    }
}

async fn run_job_inner(
    state: &WorkerState,
    request: &ProcessRequest,
) -> Result<(String, &'static str), WorkerError> {
    // SSRF guard runs before any fetch triggered by job input.
    ssrf::validate_url(&request.input_url).await?;

    let image = state
        .http
        .get(&request.input_url)
        .timeout(DOWNLOAD_TIMEOUT)
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;

    let workdir = std::env::temp_dir().join(scratch_dir_name(&request.job_id));
    tokio::fs::create_dir_all(&workdir).await?;
    let input_path = workdir.join("input.img");
    let output_path = workdir.join("output.glb");
    tokio::fs::write(&input_path, &image).await?;

    let providers = Arc::clone(&state.providers);
    let requested = request.provider.clone();
    let height_cm = request.height_cm;
    let (in_path, out_path) = (input_path.clone(), output_path.clone());
    let provider_used = tokio::task::spawn_blocking(move || {
        providers.generate(requested.as_deref(), &in_path, &out_path, height_cm)
    })
    .await
    .map_err(|_| WorkerError::ProviderPanicked)??;

    let output_key = format!("outputs/{}.glb", request.job_id);
    if let Some(callback_url) = &request.callback_url {
        upload_output(state, callback_url, &output_key, &output_path).await?;
    }

    if let Err(e) = tokio::fs::remove_dir_all(&workdir).await {
        tracing::debug!(error = %e, "failed to clean up workdir");
    }
    Ok((output_key, provider_used))
}

/// Scratch directory name for a job. Job ids come in over the wire, so any
/// path components are stripped before they touch the filesystem.
fn scratch_dir_name(job_id: &str) -> String {
    let id = job_id
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("job");
    format!("photomesh-job-{id}")
}

/// Push the mesh to the orchestrator's dev upload endpoint, derived from the
/// callback URL's origin.
async fn upload_output(
    state: &WorkerState,
    callback_url: &str,
    output_key: &str,
    output_path: &PathBuf,
) -> Result<(), WorkerError> {
    let base = Url::parse(callback_url)?.origin().ascii_serialization();
    let bytes = tokio::fs::read(output_path).await?;
    let form = reqwest::multipart::Form::new()
        .part(
            "file",
            reqwest::multipart::Part::bytes(bytes)
                .file_name(output_key.rsplit('/').next().unwrap_or("output.glb").to_string())
                .mime_str("model/gltf-binary")
                .map_err(WorkerError::Http)?,
        )
        .text("key", output_key.to_string());

    let mut upload = state
        .http
        .post(format!("{base}/dev/upload"))
        .timeout(UPLOAD_TIMEOUT)
        .multipart(form);
    if let Some(api_key) = &state.api_key {
        upload = upload.header("x-api-key", api_key);
    }
    upload.send().await?.error_for_status()?;
    Ok(())
}

async fn send_callback(state: &WorkerState, callback_url: &str, callback: &WorkerCallback) {
    let mut request = state
        .http
        .post(callback_url)
        .timeout(CALLBACK_TIMEOUT)
        .json(callback);
    if let Some(api_key) = &state.api_key {
        request = request.header("x-api-key", api_key);
    }
    match request.send().await {
        Ok(response) => {
            tracing::info!(callback_url, status = %response.status(), "callback delivered");
        }
        Err(e) => {
            tracing::warn!(callback_url, error = %e, "callback delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_dir_name_strips_path_components() {
        assert_eq!(scratch_dir_name("abc-123"), "photomesh-job-abc-123");
        assert_eq!(scratch_dir_name("../../etc/cron.d"), "photomesh-job-cron.d");
        assert_eq!(scratch_dir_name("a\\b\\c"), "photomesh-job-c");
        assert_eq!(scratch_dir_name("trailing/"), "photomesh-job-job");
        assert_eq!(scratch_dir_name(""), "photomesh-job-job");
    }
}

#[derive(Debug, thiserror::Error)]
enum WorkerError {
    #[error("input URL rejected: {0}")]
    Guard(#[from] GuardError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("provider task panicked")]
    ProviderPanicked,

    #[error("invalid callback URL: {0}")]
    Url(#[from] url::ParseError),
}
