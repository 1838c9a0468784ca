use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

use crate::models::job::{Asset, Job};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Postgres pool sized for the API handlers plus the background finalizers
/// (dispatch, fail-safe, callbacks) that share it.
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Apply pending migrations; runs at startup before the store is handed out.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("job already exists: {0}")]
    Conflict(String),

    #[error("corrupt record: {0}")]
    Data(String),
}

/// Durable record of Job and Asset entities.
///
/// Every transition is a conditional update guarded by the current status, so
/// racing finalizers (fail-safe timer vs. late callback) resolve to
/// first-writer-wins with no partial state.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError>;

    async fn create_job(&self, job: &Job) -> Result<(), StoreError>;

    /// Create the job and register its input asset in one transaction.
    async fn create_job_with_input(&self, job: &Job, asset: &Asset) -> Result<(), StoreError>;

    /// Apply new input/height to a job still in its re-submission window
    /// (queued or failed). No-op otherwise.
    async fn update_job_inputs(
        &self,
        id: &str,
        input_key: Option<&str>,
        height_cm: Option<f64>,
    ) -> Result<(), StoreError>;

    /// `queued -> processing`; no-op from any other status.
    async fn mark_processing(&self, id: &str) -> Result<(), StoreError>;

    /// Compare-and-swap completion. Sets `status = completed`,
    /// `output_key = COALESCE(existing, fallback_output_key)`, and clears any
    /// failure diagnostic; applies only while status is not `completed` (or,
    /// with `require_active`, only from `queued`/`processing`). Returns the
    /// finalized job iff this call won.
    async fn complete_job(
        &self,
        id: &str,
        fallback_output_key: &str,
        require_active: bool,
    ) -> Result<Option<Job>, StoreError>;

    /// `* -> failed` unless already completed; records the diagnostic.
    /// Returns the job iff the transition applied.
    async fn fail_job(&self, id: &str, error: &str) -> Result<Option<Job>, StoreError>;

    /// `failed -> queued`, clearing the diagnostic. Returns whether the
    /// transition happened; the caller dispatches only on `true`.
    async fn requeue_if_failed(&self, id: &str) -> Result<bool, StoreError>;

    /// Idempotent: registering an existing object_key is a no-op.
    async fn register_asset(&self, asset: &Asset) -> Result<(), StoreError>;

    async fn get_asset(&self, object_key: &str) -> Result<Option<Asset>, StoreError>;
}
