use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const HEIGHT_MIN_CM: f64 = 50.0;
pub const HEIGHT_MAX_CM: f64 = 300.0;

/// Lifecycle state of a mesh-generation job.
///
/// `queued -> processing -> {completed, failed}`; `failed -> queued` on
/// re-submission. `completed` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Still awaiting a terminal transition.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Processing)
    }
}

/// One photo-to-mesh request, from submission to terminal state.
///
/// Ids are opaque strings: the server mints UUIDs, but `/enqueue` accepts
/// externally generated ids as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub input_key: Option<String>,
    pub output_key: Option<String>,
    pub height_cm: Option<f64>,
    pub error: Option<String>,
}

impl Job {
    pub fn queued(id: String, input_key: Option<String>, height_cm: Option<f64>) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            input_key,
            output_key: None,
            height_cm,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Photo,
    Mesh,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Photo => "photo",
            AssetKind::Mesh => "mesh",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "photo" => Some(AssetKind::Photo),
            "mesh" => Some(AssetKind::Mesh),
            _ => None,
        }
    }

    /// Worker-uploaded meshes land under `outputs/`; everything else is a photo.
    pub fn from_key(key: &str) -> Self {
        if key.starts_with("outputs/") {
            AssetKind::Mesh
        } else {
            AssetKind::Photo
        }
    }
}

/// Audit record of one stored object. Registration is idempotent; the record
/// survives even if the underlying object is cleaned up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub object_key: String,
    pub kind: AssetKind,
    pub created_at: DateTime<Utc>,
}

impl Asset {
    pub fn new(object_key: String, kind: AssetKind) -> Self {
        Self {
            object_key,
            kind,
            created_at: Utc::now(),
        }
    }
}

/// Validate the optional height hint is within the accepted range (50-300 cm).
pub fn validate_height_cm(height_cm: Option<f64>) -> Result<Option<f64>, HeightError> {
    match height_cm {
        None => Ok(None),
        Some(h) if (HEIGHT_MIN_CM..=HEIGHT_MAX_CM).contains(&h) => Ok(Some(h)),
        Some(h) => Err(HeightError(h)),
    }
}

#[derive(Debug, thiserror::Error)]
#[error("height_cm must be between {HEIGHT_MIN_CM} and {HEIGHT_MAX_CM} cm, got {0}")]
pub struct HeightError(pub f64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_bounds_are_inclusive() {
        assert_eq!(validate_height_cm(Some(50.0)).unwrap(), Some(50.0));
        assert_eq!(validate_height_cm(Some(300.0)).unwrap(), Some(300.0));
        assert_eq!(validate_height_cm(Some(170.0)).unwrap(), Some(170.0));
        assert_eq!(validate_height_cm(None).unwrap(), None);
    }

    #[test]
    fn height_out_of_range_rejected() {
        assert!(validate_height_cm(Some(49.9)).is_err());
        assert!(validate_height_cm(Some(300.1)).is_err());
        assert!(validate_height_cm(Some(400.0)).is_err());
        assert!(validate_height_cm(Some(-1.0)).is_err());
    }

    #[test]
    fn status_string_round_trip() {
        for s in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(JobStatus::parse("pending"), None);
    }

    #[test]
    fn asset_kind_from_key_prefix() {
        assert_eq!(AssetKind::from_key("outputs/abc.glb"), AssetKind::Mesh);
        assert_eq!(AssetKind::from_key("inputs/abc_photo.jpg"), AssetKind::Photo);
    }
}
