use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address. Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Worker bind address (worker binary only).
    #[serde(default = "default_worker_bind_addr")]
    pub worker_bind_addr: String,

    /// PostgreSQL connection string. Unset => in-memory job store (dev mode).
    #[serde(default)]
    pub database_url: Option<String>,

    /// Enable the S3/R2-compatible object store backend.
    #[serde(default)]
    pub use_s3: bool,

    #[serde(default)]
    pub s3_bucket: Option<String>,
    #[serde(default)]
    pub s3_endpoint: Option<String>,
    #[serde(default)]
    pub s3_access_key: Option<String>,
    #[serde(default)]
    pub s3_secret_key: Option<String>,
    #[serde(default = "default_s3_region")]
    pub s3_region: String,

    /// Root directory for local object storage and asset serving.
    #[serde(default = "default_static_dir")]
    pub static_dir: String,

    /// Remote mesh worker base URL. Unset => in-process simulation.
    #[serde(default)]
    pub worker_url: Option<String>,

    /// Base URL at which the worker can reach this server (assets, callbacks).
    #[serde(default = "default_backend_internal_url")]
    pub backend_internal_url: String,

    /// Upstream application callback endpoint (fire-and-forget on completion).
    #[serde(default)]
    pub app_callback_url: Option<String>,

    /// Shared secret sent with the upstream callback (X-Callback-Secret).
    #[serde(default)]
    pub model_callback_secret: Option<String>,

    /// Default mesh provider name.
    #[serde(default = "default_provider")]
    pub model_provider: String,

    /// Delete the input photo object once a job completes.
    #[serde(default)]
    pub delete_inputs_on_success: bool,

    /// Fail-safe completion delay in seconds; 0 disables. Unset => 12 s in
    /// simulation mode, disabled when a remote worker owns completion.
    #[serde(default)]
    pub job_failsafe_seconds: Option<u64>,

    /// Shared API secret for inbound requests. Unset => auth disabled (dev).
    #[serde(default)]
    pub backend_api_key: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_worker_bind_addr() -> String {
    "0.0.0.0:8001".to_string()
}

fn default_s3_region() -> String {
    "auto".to_string()
}

fn default_static_dir() -> String {
    "./data".to_string()
}

fn default_backend_internal_url() -> String {
    "http://backend:8000".to_string()
}

fn default_provider() -> String {
    "silhouette".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Effective fail-safe delay: explicit setting wins, otherwise the
    /// fail-safe is only armed when no remote worker owns completion.
    pub fn failsafe_seconds(&self) -> u64 {
        match self.job_failsafe_seconds {
            Some(s) => s,
            None if self.worker_url.is_some() => 0,
            None => 12,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> AppConfig {
        AppConfig {
            bind_addr: default_bind_addr(),
            worker_bind_addr: default_worker_bind_addr(),
            database_url: None,
            use_s3: false,
            s3_bucket: None,
            s3_endpoint: None,
            s3_access_key: None,
            s3_secret_key: None,
            s3_region: default_s3_region(),
            static_dir: default_static_dir(),
            worker_url: None,
            backend_internal_url: default_backend_internal_url(),
            app_callback_url: None,
            model_callback_secret: None,
            model_provider: default_provider(),
            delete_inputs_on_success: false,
            job_failsafe_seconds: None,
            backend_api_key: None,
        }
    }

    #[test]
    fn failsafe_defaults_on_for_simulation_mode() {
        assert_eq!(minimal().failsafe_seconds(), 12);
    }

    #[test]
    fn failsafe_defaults_off_with_remote_worker() {
        let mut cfg = minimal();
        cfg.worker_url = Some("http://worker:8001".to_string());
        assert_eq!(cfg.failsafe_seconds(), 0);
    }

    #[test]
    fn explicit_failsafe_overrides_worker_default() {
        let mut cfg = minimal();
        cfg.worker_url = Some("http://worker:8001".to_string());
        cfg.job_failsafe_seconds = Some(30);
        assert_eq!(cfg.failsafe_seconds(), 30);
    }
}
