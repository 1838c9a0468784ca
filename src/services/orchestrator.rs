//! Job lifecycle orchestration.
//!
//! Owns every state transition from submission to terminal state across the
//! three uncoordinated completion paths: the in-process simulator, the remote
//! worker callback, and the fail-safe timer. All finalization goes through
//! conditional store updates, so whichever path reaches a job first wins and
//! the others become no-ops.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::{JobStore, StoreError};
use crate::models::api::{ProcessRequest, UpstreamCallback, WorkerCallback};
use crate::models::job::{validate_height_cm, Asset, AssetKind, HeightError, Job};
use crate::services::glb;
use crate::services::storage::{StorageError, StorageGateway};

const DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(20);
const PRESIGN_TTL_SECS: u32 = 3600;

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Remote mesh worker base URL; unset means in-process simulation.
    pub worker_url: Option<String>,
    /// Base URL at which the worker reaches this server.
    pub backend_internal_url: String,
    /// Upstream application callback target (fire-and-forget).
    pub app_callback_url: Option<String>,
    pub callback_secret: Option<String>,
    /// Provider name passed to the worker.
    pub provider: String,
    /// Fail-safe completion delay; zero disables the timer.
    pub failsafe: Duration,
    pub delete_inputs_on_success: bool,
    /// Artificial latency of the in-process simulator.
    pub simulate_delay: Duration,
}

impl OrchestratorOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            worker_url: config.worker_url.clone(),
            backend_internal_url: config.backend_internal_url.clone(),
            app_callback_url: config.app_callback_url.clone(),
            callback_secret: config.model_callback_secret.clone(),
            provider: config.model_provider.clone(),
            failsafe: Duration::from_secs(config.failsafe_seconds()),
            delete_inputs_on_success: config.delete_inputs_on_success,
            simulate_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Height(#[from] HeightError),

    #[error("unsupported image format")]
    UnsupportedImage,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of an idempotent enqueue: the job's current state plus whether this
/// call actually triggered a dispatch.
#[derive(Debug)]
pub struct EnqueueOutcome {
    pub job: Job,
    pub dispatched: bool,
}

pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    storage: Arc<StorageGateway>,
    http: reqwest::Client,
    opts: OrchestratorOptions,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        storage: Arc<StorageGateway>,
        http: reqwest::Client,
        opts: OrchestratorOptions,
    ) -> Self {
        Self {
            store,
            storage,
            http,
            opts,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn storage(&self) -> &Arc<StorageGateway> {
        &self.storage
    }

    fn output_key_for(job_id: &str) -> String {
        StorageGateway::make_key(&["outputs", &format!("{job_id}.glb")])
    }

    /// Accept a photo: validate, store the input object, create Job + Asset
    /// in one transaction, then schedule dispatch and the fail-safe timer.
    pub async fn submit(
        self: &Arc<Self>,
        data: &[u8],
        filename: &str,
        content_type: &str,
        height_cm: Option<f64>,
    ) -> Result<Job, SubmitError> {
        let height_cm = validate_height_cm(height_cm)?;
        image::guess_format(data).map_err(|_| SubmitError::UnsupportedImage)?;

        let job_id = Uuid::new_v4().to_string();
        // Strip any path components a hostile filename might carry.
        let filename = filename
            .rsplit(['/', '\\'])
            .next()
            .filter(|f| !f.is_empty())
            .unwrap_or("photo");
        let input_key = StorageGateway::make_key(&["inputs", &format!("{job_id}_{filename}")]);

        let locator = self.storage.put(&input_key, data, content_type).await?;
        tracing::info!(%job_id, %locator, "stored input photo");

        let job = Job::queued(job_id.clone(), Some(input_key.clone()), height_cm);
        let asset = Asset::new(input_key.clone(), AssetKind::Photo);
        self.store.create_job_with_input(&job, &asset).await?;

        counter!("mesh_jobs_total").increment(1);
        self.schedule(job_id, Some(input_key), height_cm);
        Ok(job)
    }

    /// Idempotent create-or-update. Dispatch fires only for brand-new jobs
    /// and `failed -> queued` re-submissions; `queued`, `processing`, and
    /// `completed` suppress it so at most one dispatch is in flight per job.
    pub async fn enqueue(
        self: &Arc<Self>,
        job_id: &str,
        input_key: &str,
        height_cm: Option<f64>,
    ) -> Result<EnqueueOutcome, StoreError> {
        let dispatched = match self.store.get_job(job_id).await? {
            Some(_) => {
                self.store
                    .update_job_inputs(job_id, Some(input_key), height_cm)
                    .await?;
                self.store.requeue_if_failed(job_id).await?
            }
            None => {
                let job = Job::queued(job_id.to_string(), Some(input_key.to_string()), height_cm);
                self.store.create_job(&job).await?;
                true
            }
        };

        if dispatched {
            counter!("mesh_jobs_total").increment(1);
            self.schedule(job_id.to_string(), Some(input_key.to_string()), height_cm);
        }

        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| StoreError::Data(format!("job {job_id} vanished after enqueue")))?;
        Ok(EnqueueOutcome { job, dispatched })
    }

    /// Spawn the dispatch task and, when enabled, the fail-safe timer. Both
    /// run as independent deferred tasks; neither blocks the caller.
    pub fn schedule(self: &Arc<Self>, job_id: String, input_key: Option<String>, height_cm: Option<f64>) {
        let this = Arc::clone(self);
        let id = job_id.clone();
        tokio::spawn(async move {
            this.dispatch(&id, input_key.as_deref(), height_cm).await;
        });

        if !self.opts.failsafe.is_zero() {
            let this = Arc::clone(self);
            let delay = self.opts.failsafe;
            tokio::spawn(async move {
                this.run_fail_safe(&job_id, delay).await;
            });
        }
    }

    /// Hand the job to the remote worker, or fall back to the in-process
    /// simulation when no worker is configured or the handoff fails.
    pub async fn dispatch(self: &Arc<Self>, job_id: &str, input_key: Option<&str>, height_cm: Option<f64>) {
        if let Some(worker_url) = self.opts.worker_url.clone() {
            match self
                .request_worker(&worker_url, job_id, input_key, height_cm)
                .await
            {
                Ok(()) => {
                    if let Err(e) = self.store.mark_processing(job_id).await {
                        tracing::error!(job_id, error = %e, "failed to mark job processing");
                    }
                    return;
                }
                Err(e) => {
                    tracing::warn!(job_id, error = %e, "worker handoff failed, falling back to simulator");
                }
            }
        } else {
            tracing::info!(job_id, "no worker configured, using simulator");
        }
        self.simulate(job_id).await;
    }

    async fn request_worker(
        &self,
        worker_url: &str,
        job_id: &str,
        input_key: Option<&str>,
        height_cm: Option<f64>,
    ) -> Result<(), DispatchError> {
        let input_key = input_key.ok_or(DispatchError::NoInput)?;
        let input_url = if self.storage.is_s3() {
            self.storage
                .presign_url(input_key, PRESIGN_TTL_SECS)
                .await
                .ok_or(DispatchError::Presign)?
        } else {
            format!(
                "{}/assets/{}",
                self.opts.backend_internal_url.trim_end_matches('/'),
                input_key
            )
        };
        let callback_url = format!(
            "{}/jobs/{}/callback",
            self.opts.backend_internal_url.trim_end_matches('/'),
            job_id
        );

        let request = ProcessRequest {
            job_id: job_id.to_string(),
            input_url,
            height_cm,
            callback_url: Some(callback_url),
            provider: Some(self.opts.provider.clone()),
        };
        self.http
            .post(format!("{}/process", worker_url.trim_end_matches('/')))
            .timeout(DISPATCH_TIMEOUT)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// In-process completion path: short artificial delay, placeholder mesh
    /// at the deterministic output key, then finalize.
    pub async fn simulate(self: &Arc<Self>, job_id: &str) {
        if !self.opts.simulate_delay.is_zero() {
            tokio::time::sleep(self.opts.simulate_delay).await;
        }
        let start = std::time::Instant::now();

        let output_key = Self::output_key_for(job_id);
        if let Err(e) = self
            .storage
            .put(&output_key, &glb::placeholder_bytes(), glb::GLTF_CONTENT_TYPE)
            .await
        {
            // finalize still runs: the local-mode placeholder guarantee
            // retries the write.
            tracing::warn!(job_id, error = %e, "simulator could not store output object");
        }
        histogram!("mesh_processing_seconds").record(start.elapsed().as_secs_f64());

        if let Err(e) = self
            .finalize_completed(job_id, None, Some("placeholder"), false)
            .await
        {
            tracing::error!(job_id, error = %e, "simulator failed to finalize job");
        }
    }

    /// Inbound worker completion report. Returns `false` when the job id is
    /// unknown; every other outcome is absorbed.
    pub async fn handle_worker_callback(
        self: &Arc<Self>,
        job_id: &str,
        callback: WorkerCallback,
    ) -> Result<bool, StoreError> {
        if self.store.get_job(job_id).await?.is_none() {
            return Ok(false);
        }
        match callback {
            WorkerCallback::Completed {
                output_key,
                provider_used,
            } => {
                if let Err(e) = self
                    .finalize_completed(job_id, output_key, provider_used.as_deref(), false)
                    .await
                {
                    tracing::error!(job_id, error = %e, "failed to finalize completed job");
                }
            }
            WorkerCallback::Failed { error } => {
                tracing::warn!(job_id, error = %error, "worker reported job failure");
                match self.store.fail_job(job_id, &error).await {
                    Ok(Some(_)) => {
                        counter!("mesh_jobs_failed").increment(1);
                    }
                    Ok(None) => {
                        tracing::debug!(job_id, "failure callback ignored, job already completed");
                    }
                    Err(e) => {
                        tracing::error!(job_id, error = %e, "failed to record job failure");
                    }
                }
            }
        }
        Ok(true)
    }

    /// Fail-safe timer body: after `delay`, force-complete the job if it is
    /// still queued or processing.
    pub async fn run_fail_safe(self: &Arc<Self>, job_id: &str, delay: Duration) {
        tokio::time::sleep(delay).await;
        match self.store.get_job(job_id).await {
            Ok(Some(job)) if job.status.is_active() => {
                tracing::warn!(job_id, "fail-safe completing stuck job");
                if let Err(e) = self.finalize_completed(job_id, None, None, true).await {
                    tracing::error!(job_id, error = %e, "fail-safe finalization failed");
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(job_id, error = %e, "fail-safe could not read job");
            }
        }
    }

    /// Conditional completion plus its side effects. The store decides the
    /// race; a losing call returns without side effects. Side effects are
    /// best-effort and never revert the transition.
    async fn finalize_completed(
        &self,
        job_id: &str,
        output_key: Option<String>,
        provider_used: Option<&str>,
        require_active: bool,
    ) -> Result<Option<Job>, StoreError> {
        let fallback = Self::output_key_for(job_id);
        let chosen = output_key.as_deref().unwrap_or(&fallback);
        let Some(job) = self
            .store
            .complete_job(job_id, chosen, require_active)
            .await?
        else {
            tracing::debug!(job_id, "completion skipped, job already finalized");
            return Ok(None);
        };

        counter!("mesh_jobs_completed").increment(1);
        tracing::info!(
            job_id,
            output_key = job.output_key.as_deref().unwrap_or(""),
            provider = provider_used.unwrap_or("unknown"),
            "job completed"
        );

        if let Some(key) = &job.output_key {
            if let Err(e) = self
                .store
                .register_asset(&Asset::new(key.clone(), AssetKind::Mesh))
                .await
            {
                tracing::warn!(job_id, error = %e, "failed to register output asset");
            }
            // Local mode: the completion acknowledgement implies the object
            // is retrievable.
            self.storage
                .ensure_object(key, &glb::placeholder_bytes(), glb::GLTF_CONTENT_TYPE)
                .await;
        }

        if self.opts.delete_inputs_on_success {
            if let Some(input_key) = &job.input_key {
                self.storage.delete(input_key).await;
            }
        }

        self.forward_upstream(job_id, job.output_key.as_deref()).await;
        Ok(Some(job))
    }

    /// Fire-and-forget callback to the upstream application; only sent when
    /// both target and secret are configured.
    async fn forward_upstream(&self, job_id: &str, output_key: Option<&str>) {
        let (Some(url), Some(secret)) = (
            self.opts.app_callback_url.as_deref(),
            self.opts.callback_secret.as_deref(),
        ) else {
            return;
        };

        let payload = UpstreamCallback {
            job_id: job_id.to_string(),
            status: "completed".to_string(),
            output_key: output_key.map(str::to_string),
        };
        let result = self
            .http
            .post(url)
            .timeout(CALLBACK_TIMEOUT)
            .header("X-Callback-Secret", secret)
            .json(&payload)
            .send()
            .await;
        match result {
            Ok(resp) => {
                tracing::info!(job_id, status = %resp.status(), "forwarded upstream callback");
            }
            Err(e) => {
                tracing::warn!(job_id, error = %e, "failed to forward upstream callback");
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum DispatchError {
    #[error("job has no input key")]
    NoInput,

    #[error("could not presign input URL")]
    Presign,

    #[error("worker request failed: {0}")]
    Http(#[from] reqwest::Error),
}
