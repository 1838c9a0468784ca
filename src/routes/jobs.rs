use axum::extract::{Multipart, Path, State};
use axum::Json;
use garde::Validate;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{
    ApiError, EnqueueRequest, JobStatusResponse, PresignRequest, PresignResponse, PresignedUpload,
    SubmitResponse, WorkerCallback,
};
use crate::models::job::{Asset, AssetKind};
use crate::services::orchestrator::SubmitError;
use crate::services::storage::StorageGateway;

const PRESIGN_TTL_SECS: u32 = 3600;

/// POST /uploads — submit a photo (multipart `file` + optional `height_cm`).
pub async fn create_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<SubmitResponse>, ApiError> {
    let mut file: Option<(Vec<u8>, String, String)> = None;
    let mut height_cm: Option<f64> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::BadRequest("malformed multipart body".to_string()))?
    {
        match field.name() {
            Some("file") => {
                let filename = field.file_name().unwrap_or("photo").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|_| ApiError::BadRequest("failed to read file field".to_string()))?;
                file = Some((data.to_vec(), filename, content_type));
            }
            Some("height_cm") => {
                let text = field
                    .text()
                    .await
                    .map_err(|_| ApiError::BadRequest("failed to read height_cm".to_string()))?;
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    height_cm = Some(trimmed.parse().map_err(|_| {
                        ApiError::BadRequest("height_cm must be a number".to_string())
                    })?);
                }
            }
            _ => {}
        }
    }

    let (data, filename, content_type) =
        file.ok_or_else(|| ApiError::BadRequest("missing file field".to_string()))?;

    let job = state
        .orchestrator
        .submit(&data, &filename, &content_type, height_cm)
        .await
        .map_err(|e| match e {
            SubmitError::Height(h) => ApiError::BadRequest(h.to_string()),
            SubmitError::UnsupportedImage => ApiError::UnsupportedMedia,
            other => {
                tracing::error!(error = %other, "submission failed");
                ApiError::Internal
            }
        })?;

    Ok(Json(SubmitResponse {
        job_id: job.id,
        status: job.status.as_str().to_string(),
    }))
}

/// GET /jobs/{job_id} — poll job status.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state
        .store
        .get_job(&job_id)
        .await
        .map_err(|e| {
            tracing::error!(%job_id, error = %e, "job lookup failed");
            ApiError::Internal
        })?
        .ok_or(ApiError::NotFound)?;

    let output_url = match &job.output_key {
        Some(key) => state.storage.presign_url(key, PRESIGN_TTL_SECS).await,
        None => None,
    };

    Ok(Json(JobStatusResponse {
        id: job.id,
        status: job.status.as_str().to_string(),
        created_at: job.created_at,
        output_url,
    }))
}

/// POST /jobs/{job_id}/callback — worker completion report. Internal errors
/// are absorbed; only an unknown job id is surfaced.
pub async fn job_callback(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(callback): Json<WorkerCallback>,
) -> Result<Json<Value>, ApiError> {
    let found = state
        .orchestrator
        .handle_worker_callback(&job_id, callback)
        .await
        .map_err(|e| {
            tracing::error!(%job_id, error = %e, "callback handling failed");
            ApiError::Internal
        })?;
    if !found {
        return Err(ApiError::NotFound);
    }
    Ok(Json(json!({ "ok": true })))
}

/// POST /enqueue — idempotent create-or-update for a job.
pub async fn enqueue_job(
    State(state): State<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    request
        .validate()
        .map_err(|report| ApiError::BadRequest(report.to_string()))?;

    let outcome = state
        .orchestrator
        .enqueue(&request.job_id, &request.input_key, request.height_cm)
        .await
        .map_err(|e| {
            tracing::error!(job_id = %request.job_id, error = %e, "enqueue failed");
            ApiError::Internal
        })?;

    Ok(Json(SubmitResponse {
        job_id: outcome.job.id,
        status: outcome.job.status.as_str().to_string(),
    }))
}

/// POST /presign — per-file upload descriptors: presigned PUT in S3 mode,
/// dev-upload fallback locally.
pub async fn presign(
    State(state): State<AppState>,
    Json(request): Json<PresignRequest>,
) -> Result<Json<PresignResponse>, ApiError> {
    let mut uploads = Vec::with_capacity(request.files.len());
    for file in &request.files {
        let name = file.name.as_deref().unwrap_or("file");
        let key = StorageGateway::make_key(&["inputs", &format!("{}_{}", Uuid::new_v4(), name)]);
        match state.storage.presign_upload(&key, PRESIGN_TTL_SECS).await {
            Some(url) => uploads.push(PresignedUpload {
                object_key: key,
                url,
                method: "PUT".to_string(),
                dev: None,
            }),
            None => uploads.push(PresignedUpload {
                object_key: key,
                url: "/dev/upload".to_string(),
                method: "POST".to_string(),
                dev: Some(true),
            }),
        }
    }
    Ok(Json(PresignResponse { uploads }))
}

/// POST /dev/upload — direct upload path for local mode and the worker's
/// output meshes (multipart `file` + `key`).
pub async fn dev_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut file: Option<(Vec<u8>, String)> = None;
    let mut key: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::BadRequest("malformed multipart body".to_string()))?
    {
        match field.name() {
            Some("file") => {
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|_| ApiError::BadRequest("failed to read file field".to_string()))?;
                file = Some((data.to_vec(), content_type));
            }
            Some("key") => {
                key = Some(field.text().await.map_err(|_| {
                    ApiError::BadRequest("failed to read key field".to_string())
                })?);
            }
            _ => {}
        }
    }

    let (data, content_type) =
        file.ok_or_else(|| ApiError::BadRequest("missing file field".to_string()))?;
    let key = key.ok_or_else(|| ApiError::BadRequest("missing key field".to_string()))?;

    let locator = state
        .storage
        .put(&key, &data, &content_type)
        .await
        .map_err(|e| {
            tracing::warn!(%key, error = %e, "dev upload failed");
            ApiError::BadRequest(format!("cannot store object: {e}"))
        })?;
    tracing::debug!(%key, %locator, "stored dev upload");

    if let Err(e) = state
        .store
        .register_asset(&Asset::new(key.clone(), AssetKind::from_key(&key)))
        .await
    {
        tracing::warn!(%key, error = %e, "failed to register uploaded asset");
    }

    Ok(Json(json!({ "ok": true, "object_key": key })))
}
