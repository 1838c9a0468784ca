mod app_state;
mod config;
mod db;
mod models;
mod routes;
mod services;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use config::AppConfig;
use db::JobStore;
use services::orchestrator::{Orchestrator, OrchestratorOptions};
use services::storage::{StorageGateway, StorageSettings};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing photomesh server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_histogram!(
        "mesh_processing_seconds",
        "Time to produce a mesh for a job"
    );
    metrics::describe_counter!("mesh_jobs_total", "Total mesh jobs dispatched");
    metrics::describe_counter!("mesh_jobs_completed", "Total mesh jobs completed");
    metrics::describe_counter!("mesh_jobs_failed", "Total mesh jobs that failed");

    // Initialize the job store: Postgres when configured, in-memory otherwise
    let store: Arc<dyn JobStore> = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to PostgreSQL database");
            let pool = db::init_pool(database_url)
                .await
                .expect("Failed to connect to database");

            tracing::info!("Running database migrations");
            db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");

            Arc::new(db::PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory job store (dev mode)");
            Arc::new(db::MemoryStore::new())
        }
    };

    // Initialize object storage (S3/R2 with local fallback)
    tracing::info!("Initializing storage gateway");
    let storage = Arc::new(
        StorageGateway::new(&StorageSettings {
            use_s3: config.use_s3,
            bucket: config.s3_bucket.clone(),
            endpoint: config.s3_endpoint.clone(),
            access_key: config.s3_access_key.clone(),
            secret_key: config.s3_secret_key.clone(),
            region: config.s3_region.clone(),
            local_root: PathBuf::from(&config.static_dir),
        })
        .expect("Failed to initialize storage gateway"),
    );
    tracing::info!(backend = storage.backend_name(), "storage ready");

    // Initialize the job orchestrator
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&store),
        Arc::clone(&storage),
        reqwest::Client::new(),
        OrchestratorOptions::from_config(&config),
    ));

    // Create shared application state
    let state = AppState::new(
        store,
        Arc::clone(&storage),
        orchestrator,
        config.backend_api_key.clone(),
        config.worker_url.clone(),
    );

    // Build API routes
    let app = Router::new()
        .route("/healthz", get(routes::health::health_check))
        .route("/uploads", post(routes::jobs::create_upload))
        .route("/jobs/{job_id}", get(routes::jobs::get_job))
        .route("/jobs/{job_id}/callback", post(routes::jobs::job_callback))
        .route("/enqueue", post(routes::jobs::enqueue_job))
        .route("/presign", post(routes::jobs::presign))
        .route("/dev/upload", post(routes::jobs::dev_upload))
        // Dev-only static serving for local object storage
        .nest_service("/assets", ServeDir::new(&config.static_dir))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            routes::require_api_key,
        ))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(20 * 1024 * 1024)); // 20 MB limit

    tracing::info!("Starting photomesh on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
