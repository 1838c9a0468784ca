use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::db::{JobStore, StoreError};
use crate::models::job::{Asset, Job, JobStatus};

/// In-memory job store for dev mode (no DATABASE_URL) and tests.
///
/// Transitions hold the write lock across their read-check-write, so the
/// conditional-update semantics match the Postgres store.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

#[derive(Default)]
struct State {
    jobs: HashMap<String, Job>,
    assets: HashMap<String, Asset>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.state.read().await.jobs.get(id).cloned())
    }

    async fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.jobs.contains_key(&job.id) {
            return Err(StoreError::Conflict(job.id.clone()));
        }
        state.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn create_job_with_input(&self, job: &Job, asset: &Asset) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.jobs.contains_key(&job.id) {
            return Err(StoreError::Conflict(job.id.clone()));
        }
        state
            .assets
            .entry(asset.object_key.clone())
            .or_insert_with(|| asset.clone());
        state.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn update_job_inputs(
        &self,
        id: &str,
        input_key: Option<&str>,
        height_cm: Option<f64>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if let Some(job) = state.jobs.get_mut(id) {
            if matches!(job.status, JobStatus::Queued | JobStatus::Failed) {
                if let Some(key) = input_key {
                    job.input_key = Some(key.to_string());
                }
                if height_cm.is_some() {
                    job.height_cm = height_cm;
                }
            }
        }
        Ok(())
    }

    async fn mark_processing(&self, id: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if let Some(job) = state.jobs.get_mut(id) {
            if job.status == JobStatus::Queued {
                job.status = JobStatus::Processing;
            }
        }
        Ok(())
    }

    async fn complete_job(
        &self,
        id: &str,
        fallback_output_key: &str,
        require_active: bool,
    ) -> Result<Option<Job>, StoreError> {
        let mut state = self.state.write().await;
        let Some(job) = state.jobs.get_mut(id) else {
            return Ok(None);
        };
        let eligible = if require_active {
            job.status.is_active()
        } else {
            job.status != JobStatus::Completed
        };
        if !eligible {
            return Ok(None);
        }
        job.status = JobStatus::Completed;
        job.error = None;
        if job.output_key.is_none() {
            job.output_key = Some(fallback_output_key.to_string());
        }
        Ok(Some(job.clone()))
    }

    async fn fail_job(&self, id: &str, error: &str) -> Result<Option<Job>, StoreError> {
        let mut state = self.state.write().await;
        let Some(job) = state.jobs.get_mut(id) else {
            return Ok(None);
        };
        if job.status == JobStatus::Completed {
            return Ok(None);
        }
        job.status = JobStatus::Failed;
        job.error = Some(error.to_string());
        Ok(Some(job.clone()))
    }

    async fn requeue_if_failed(&self, id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state.jobs.get_mut(id) {
            Some(job) if job.status == JobStatus::Failed => {
                job.status = JobStatus::Queued;
                job.error = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn register_asset(&self, asset: &Asset) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state
            .assets
            .entry(asset.object_key.clone())
            .or_insert_with(|| asset.clone());
        Ok(())
    }

    async fn get_asset(&self, object_key: &str) -> Result<Option<Asset>, StoreError> {
        Ok(self.state.read().await.assets.get(object_key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::AssetKind;

    fn queued(id: &str) -> Job {
        Job::queued(id.to_string(), Some(format!("inputs/{id}_a.jpg")), Some(170.0))
    }

    #[tokio::test]
    async fn complete_is_first_writer_wins() {
        let store = MemoryStore::new();
        store.create_job(&queued("j1")).await.unwrap();

        let won = store.complete_job("j1", "outputs/j1.glb", false).await.unwrap();
        assert!(won.is_some());
        assert_eq!(won.unwrap().output_key.as_deref(), Some("outputs/j1.glb"));

        // Second finalizer loses; output_key untouched.
        let lost = store.complete_job("j1", "outputs/other.glb", false).await.unwrap();
        assert!(lost.is_none());
        let job = store.get_job("j1").await.unwrap().unwrap();
        assert_eq!(job.output_key.as_deref(), Some("outputs/j1.glb"));
    }

    #[tokio::test]
    async fn require_active_skips_failed_jobs() {
        let store = MemoryStore::new();
        store.create_job(&queued("j1")).await.unwrap();
        store.fail_job("j1", "boom").await.unwrap();

        assert!(store
            .complete_job("j1", "outputs/j1.glb", true)
            .await
            .unwrap()
            .is_none());
        // Without the active guard, a success callback may still complete it.
        assert!(store
            .complete_job("j1", "outputs/j1.glb", false)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn late_completion_clears_failure_diagnostic() {
        let store = MemoryStore::new();
        store.create_job(&queued("j1")).await.unwrap();
        store.fail_job("j1", "provider timeout").await.unwrap();

        // A success callback may still finalize a failed job; the stale
        // diagnostic must not survive the transition.
        let job = store
            .complete_job("j1", "outputs/j1.glb", false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error.is_none());

        let stored = store.get_job("j1").await.unwrap().unwrap();
        assert!(stored.error.is_none());
        assert_eq!(stored.output_key.as_deref(), Some("outputs/j1.glb"));
    }

    #[tokio::test]
    async fn fail_never_touches_completed_jobs() {
        let store = MemoryStore::new();
        store.create_job(&queued("j1")).await.unwrap();
        store.complete_job("j1", "outputs/j1.glb", false).await.unwrap();

        assert!(store.fail_job("j1", "late failure").await.unwrap().is_none());
        let job = store.get_job("j1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error.is_none());
        assert_eq!(job.output_key.as_deref(), Some("outputs/j1.glb"));
    }

    #[tokio::test]
    async fn requeue_only_from_failed() {
        let store = MemoryStore::new();
        store.create_job(&queued("j1")).await.unwrap();
        assert!(!store.requeue_if_failed("j1").await.unwrap());

        store.fail_job("j1", "boom").await.unwrap();
        assert!(store.requeue_if_failed("j1").await.unwrap());
        let job = store.get_job("j1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.error.is_none());

        // Second requeue is a no-op: the job is already queued.
        assert!(!store.requeue_if_failed("j1").await.unwrap());
    }

    #[tokio::test]
    async fn asset_registration_is_idempotent() {
        let store = MemoryStore::new();
        let first = Asset::new("outputs/j1.glb".into(), AssetKind::Mesh);
        store.register_asset(&first).await.unwrap();
        store
            .register_asset(&Asset::new("outputs/j1.glb".into(), AssetKind::Photo))
            .await
            .unwrap();
        let stored = store.get_asset("outputs/j1.glb").await.unwrap().unwrap();
        assert_eq!(stored.kind, AssetKind::Mesh);
    }

    #[tokio::test]
    async fn input_updates_blocked_once_processing() {
        let store = MemoryStore::new();
        store.create_job(&queued("j1")).await.unwrap();
        store.mark_processing("j1").await.unwrap();

        store
            .update_job_inputs("j1", Some("inputs/other.jpg"), Some(190.0))
            .await
            .unwrap();
        let job = store.get_job("j1").await.unwrap().unwrap();
        assert_eq!(job.input_key.as_deref(), Some("inputs/j1_a.jpg"));
        assert_eq!(job.height_cm, Some(170.0));
    }
}
