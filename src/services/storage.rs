use std::fmt;
use std::path::{Path, PathBuf};

use s3::creds::Credentials;
use s3::{Bucket, Region};

/// Uniform object storage over an S3/R2-compatible bucket with a local-disk
/// fallback. The local root is always available: in S3 mode it absorbs writes
/// the bucket rejects, in local mode it is the primary backend.
pub struct StorageGateway {
    s3: Option<S3Backend>,
    local_root: PathBuf,
}

struct S3Backend {
    bucket: Box<Bucket>,
    bucket_name: String,
}

/// Where a write actually landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectLocator {
    S3 { bucket: String, key: String },
    Local { path: PathBuf },
}

impl ObjectLocator {
    pub fn is_local(&self) -> bool {
        matches!(self, ObjectLocator::Local { .. })
    }
}

impl fmt::Display for ObjectLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectLocator::S3 { bucket, key } => write!(f, "s3://{}/{}", bucket, key),
            ObjectLocator::Local { path } => write!(f, "local://{}", path.display()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub use_s3: bool,
    pub bucket: Option<String>,
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub region: String,
    pub local_root: PathBuf,
}

impl StorageGateway {
    pub fn new(settings: &StorageSettings) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&settings.local_root)
            .map_err(|e| StorageError::Config(format!("cannot create local root: {e}")))?;

        let s3 = match (
            settings.use_s3,
            &settings.bucket,
            &settings.endpoint,
            &settings.access_key,
            &settings.secret_key,
        ) {
            (true, Some(bucket), Some(endpoint), Some(access_key), Some(secret_key)) => {
                let region = Region::Custom {
                    region: settings.region.clone(),
                    endpoint: endpoint.clone(),
                };
                let credentials =
                    Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                        .map_err(|e| StorageError::Config(e.to_string()))?;
                let handle = Bucket::new(bucket, region, credentials)
                    .map_err(|e| StorageError::Config(e.to_string()))?;
                Some(S3Backend {
                    bucket: handle,
                    bucket_name: bucket.clone(),
                })
            }
            (true, ..) => {
                tracing::warn!("USE_S3 set but bucket config incomplete; using local storage");
                None
            }
            _ => None,
        };

        Ok(Self {
            s3,
            local_root: settings.local_root.clone(),
        })
    }

    /// Local-only gateway (dev mode, tests).
    pub fn local_only(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| StorageError::Config(format!("cannot create local root: {e}")))?;
        Ok(Self {
            s3: None,
            local_root: root,
        })
    }

    pub fn is_s3(&self) -> bool {
        self.s3.is_some()
    }

    pub fn backend_name(&self) -> &'static str {
        if self.is_s3() {
            "s3"
        } else {
            "local"
        }
    }

    /// Join key segments with `/`, trimming separator padding.
    pub fn make_key(parts: &[&str]) -> String {
        parts
            .iter()
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn checked_local_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() || key.starts_with('/') || key.split('/').any(|seg| seg == "..") {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.local_root.join(key))
    }

    pub fn local_path(&self, key: &str) -> Option<PathBuf> {
        self.checked_local_path(key).ok()
    }

    /// Write an object. S3 first; any S3 failure is logged and the write
    /// falls back to the local root. Errors only if both backends fail.
    pub async fn put(
        &self,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<ObjectLocator, StorageError> {
        let path = self.checked_local_path(key)?;

        if let Some(s3) = &self.s3 {
            match s3
                .bucket
                .put_object_with_content_type(key, data, content_type)
                .await
            {
                Ok(_) => {
                    return Ok(ObjectLocator::S3 {
                        bucket: s3.bucket_name.clone(),
                        key: key.to_string(),
                    })
                }
                Err(e) => {
                    tracing::warn!(key, error = %e, "S3 put failed, falling back to local storage");
                }
            }
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        Ok(ObjectLocator::Local { path })
    }

    /// Time-limited retrieval URL. Local mode returns a path-based URL only
    /// once the object exists on disk, distinguishing "not ready" from
    /// "ready".
    pub async fn presign_url(&self, key: &str, ttl_secs: u32) -> Option<String> {
        if let Some(s3) = &self.s3 {
            match s3.bucket.presign_get(key, ttl_secs, None).await {
                Ok(url) => return Some(url),
                Err(e) => {
                    tracing::warn!(key, error = %e, "S3 presign failed, falling back to local assets");
                }
            }
        }
        let path = self.checked_local_path(key).ok()?;
        if path.exists() {
            Some(format!("/assets/{key}"))
        } else {
            None
        }
    }

    /// Presigned PUT for direct client upload; `None` in local mode (clients
    /// go through the dev upload endpoint instead).
    pub async fn presign_upload(&self, key: &str, ttl_secs: u32) -> Option<String> {
        let s3 = self.s3.as_ref()?;
        match s3.bucket.presign_put(key, ttl_secs, None, None).await {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!(key, error = %e, "S3 upload presign failed");
                None
            }
        }
    }

    /// Best-effort delete; never errors.
    pub async fn delete(&self, key: &str) {
        if let Some(s3) = &self.s3 {
            match s3.bucket.delete_object(key).await {
                Ok(_) => return,
                Err(e) => {
                    tracing::warn!(key, error = %e, "S3 delete failed, trying local");
                }
            }
        }
        if let Ok(path) = self.checked_local_path(key) {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(key, error = %e, "local delete failed");
                }
            }
        }
    }

    /// Local mode only: make sure some object exists at `key`, writing the
    /// given bytes if nothing is there yet. No-op in S3 mode.
    pub async fn ensure_object(&self, key: &str, data: &[u8], content_type: &str) {
        if self.is_s3() {
            return;
        }
        let exists = self
            .checked_local_path(key)
            .map(|p| p.exists())
            .unwrap_or(true);
        if !exists {
            if let Err(e) = self.put(key, data, content_type).await {
                tracing::warn!(key, error = %e, "failed to write placeholder object");
            }
        }
    }

    pub fn object_exists(&self, key: &str) -> bool {
        match &self.s3 {
            // S3 existence would need a HEAD request; callers in S3 mode rely
            // on presigned URLs instead.
            Some(_) => true,
            None => self
                .checked_local_path(key)
                .map(|p| p.exists())
                .unwrap_or(false),
        }
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("storage configuration error: {0}")]
    Config(String),
}
