use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::models::job::{HEIGHT_MAX_CM, HEIGHT_MIN_CM};

/// Response after submitting a photo.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: String,
}

/// Response for polling job status. `output_url` stays null until the backing
/// object is actually retrievable.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub output_url: Option<String>,
}

/// Idempotent create-or-update request for a job.
#[derive(Debug, Deserialize, Validate)]
pub struct EnqueueRequest {
    #[garde(length(min = 1, max = 200))]
    pub job_id: String,

    #[garde(length(min = 1, max = 500))]
    pub input_key: String,

    #[garde(range(min = HEIGHT_MIN_CM, max = HEIGHT_MAX_CM))]
    pub height_cm: Option<f64>,
}

/// Dispatch request sent to the mesh worker (`POST {worker}/process`).
#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub job_id: String,
    pub input_url: String,
    pub height_cm: Option<f64>,
    pub callback_url: Option<String>,
    pub provider: Option<String>,
}

/// Worker completion report, tagged on `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerCallback {
    Completed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_used: Option<String>,
    },
    Failed {
        error: String,
    },
}

/// Payload forwarded to the upstream application on completion.
#[derive(Debug, Serialize, Deserialize)]
pub struct UpstreamCallback {
    pub job_id: String,
    pub status: String,
    pub output_key: Option<String>,
}

/// Presign request: one entry per file the client intends to upload.
#[derive(Debug, Deserialize)]
pub struct PresignRequest {
    pub files: Vec<PresignFile>,
}

#[derive(Debug, Deserialize)]
pub struct PresignFile {
    pub name: Option<String>,
    pub content_type: Option<String>,
    pub size: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct PresignResponse {
    pub uploads: Vec<PresignedUpload>,
}

#[derive(Debug, Serialize)]
pub struct PresignedUpload {
    pub object_key: String,
    pub url: String,
    pub method: String,
    /// Set when the client must fall back to the dev upload endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev: Option<bool>,
}

/// Route-level error with a JSON `{"error": ...}` body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("not_found")]
    NotFound,

    #[error("unsupported media type")]
    UnsupportedMedia,

    #[error("internal error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::UnsupportedMedia => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_callback_completed_parses() {
        let cb: WorkerCallback = serde_json::from_str(
            r#"{"status":"completed","output_key":"outputs/j1.glb","provider_used":"silhouette"}"#,
        )
        .unwrap();
        match cb {
            WorkerCallback::Completed {
                output_key,
                provider_used,
            } => {
                assert_eq!(output_key.as_deref(), Some("outputs/j1.glb"));
                assert_eq!(provider_used.as_deref(), Some("silhouette"));
            }
            _ => panic!("expected completed"),
        }
    }

    #[test]
    fn worker_callback_completed_without_key_parses() {
        let cb: WorkerCallback = serde_json::from_str(r#"{"status":"completed"}"#).unwrap();
        assert!(matches!(
            cb,
            WorkerCallback::Completed {
                output_key: None,
                ..
            }
        ));
    }

    #[test]
    fn worker_callback_failed_parses() {
        let cb: WorkerCallback =
            serde_json::from_str(r#"{"status":"failed","error":"provider timeout"}"#).unwrap();
        assert!(matches!(cb, WorkerCallback::Failed { error } if error == "provider timeout"));
    }

    #[test]
    fn worker_callback_unknown_status_rejected() {
        assert!(serde_json::from_str::<WorkerCallback>(r#"{"status":"exploded"}"#).is_err());
    }

    #[test]
    fn enqueue_request_height_validated() {
        let ok = EnqueueRequest {
            job_id: "j1".into(),
            input_key: "inputs/j1_a.jpg".into(),
            height_cm: Some(170.0),
        };
        assert!(ok.validate().is_ok());

        let bad = EnqueueRequest {
            job_id: "j1".into(),
            input_key: "inputs/j1_a.jpg".into(),
            height_cm: Some(400.0),
        };
        assert!(bad.validate().is_err());
    }
}
