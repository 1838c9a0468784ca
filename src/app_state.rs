use std::sync::Arc;

use crate::db::JobStore;
use crate::services::orchestrator::Orchestrator;
use crate::services::storage::StorageGateway;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub storage: Arc<StorageGateway>,
    pub orchestrator: Arc<Orchestrator>,
    /// Shared API secret; `None` disables auth (dev mode).
    pub api_key: Option<String>,
    pub worker_url: Option<String>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn JobStore>,
        storage: Arc<StorageGateway>,
        orchestrator: Arc<Orchestrator>,
        api_key: Option<String>,
        worker_url: Option<String>,
    ) -> Self {
        Self {
            store,
            storage,
            orchestrator,
            api_key,
            worker_url,
        }
    }
}
