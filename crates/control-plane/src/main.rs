//! NBForge Control Plane Server
//!
//! An async Rust server that accepts notebook execution requests, runs each
//! one as a cluster workload and tracks it through its lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nbforge_control_plane::{
    admission::AdmissionController,
    cluster::{
        ClusterScheduler, JobOrchestrator, KubeScheduler, MemoryScheduler, OrchestratorSettings,
    },
    config::{
        AppConfig, ClusterConfig, DatabaseConfig, RateLimitConfig, SchedulerBackend,
        StorageBackend, StorageConfig, StoreBackend,
    },
    db::{create_pool, run_migrations, DbPool},
    handlers,
    io_pool::IoPool,
    notify::{Notifier, TracingNotifier, WebhookNotifier},
    services::{execution::ExecutionDefaults, CallbackGateway, ExecutionService},
    state::AppState,
    storage::{CachedStorage, ObjectStorage, ObjectStoreBackend},
    store::{ExecutionRecords, ExecutionStore, MemoryExecutionStore, PgExecutionStore},
};

/// Initialize tracing/logging.
fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,nbforge_control_plane=debug,tower_http=debug".into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Load a config section, falling back to defaults with a warning.
fn load_or_default<T: Default>(name: &str, loaded: Result<T, envy::Error>) -> T {
    loaded.unwrap_or_else(|e| {
        tracing::warn!(error = %e, config = name, "Failed to load config, using defaults");
        T::default()
    })
}

async fn build_store(app_config: &AppConfig) -> anyhow::Result<(Arc<dyn ExecutionStore>, Option<DbPool>)> {
    match app_config.store {
        StoreBackend::Postgres => {
            let db_config = load_or_default("database", DatabaseConfig::from_env());
            let pool = create_pool(&db_config).await?;
            run_migrations(&pool).await?;
            Ok((Arc::new(PgExecutionStore::new(pool.clone())), Some(pool)))
        }
        StoreBackend::Memory => {
            tracing::warn!("Execution records are kept in memory and lost on restart");
            Ok((Arc::new(MemoryExecutionStore::new()), None))
        }
    }
}

async fn build_scheduler(cluster_config: &ClusterConfig) -> anyhow::Result<Arc<dyn ClusterScheduler>> {
    Ok(match cluster_config.scheduler {
        SchedulerBackend::Kube => {
            Arc::new(KubeScheduler::try_default(cluster_config.namespace.clone()).await?)
        }
        SchedulerBackend::Memory => {
            tracing::warn!("Using in-memory scheduler; no workloads will run");
            Arc::new(MemoryScheduler::new())
        }
    })
}

fn build_storage(app_config: &AppConfig, storage_config: &StorageConfig) -> anyhow::Result<Arc<dyn ObjectStorage>> {
    let backend = match storage_config.backend {
        StorageBackend::S3 => ObjectStoreBackend::s3(storage_config)?,
        StorageBackend::Memory => ObjectStoreBackend::in_memory(&storage_config.bucket),
    };
    Ok(Arc::new(CachedStorage::new(
        Arc::new(backend),
        app_config.cache_size,
        app_config.cache_ttl(),
    )))
}

fn build_notifier(app_config: &AppConfig) -> anyhow::Result<Arc<dyn Notifier>> {
    Ok(match app_config.notification_webhook_url.as_deref() {
        Some(url) if !url.is_empty() => Arc::new(WebhookNotifier::new(url)?),
        _ => Arc::new(TracingNotifier),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let app_config = AppConfig::from_env();
    init_tracing(app_config.as_ref().map(|c| c.log_json).unwrap_or(false));

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting NBForge Control Plane"
    );

    let app_config = load_or_default("app", app_config);
    let cluster_config = load_or_default("cluster", ClusterConfig::from_env());
    let storage_config = load_or_default("storage", StorageConfig::from_env());
    let rate_limit_config = load_or_default("rate limit", RateLimitConfig::from_env());

    tracing::info!(
        host = %app_config.host,
        port = app_config.port,
        store = ?app_config.store,
        scheduler = ?cluster_config.scheduler,
        storage = ?storage_config.backend,
        "Configuration loaded"
    );

    let (store, db_pool) = build_store(&app_config).await?;
    let records = ExecutionRecords::new(store, build_notifier(&app_config)?);
    let orchestrator = Arc::new(
        JobOrchestrator::new(
            build_scheduler(&cluster_config).await?,
            OrchestratorSettings::from_config(&cluster_config, &storage_config, &app_config.api_url),
        )
        .with_call_timeout(app_config.io_timeout()),
    );

    let execution_service = ExecutionService::new(
        records.clone(),
        build_storage(&app_config, &storage_config)?,
        orchestrator,
        IoPool::new(app_config.io_pool_size, app_config.io_timeout()),
        ExecutionDefaults::from_config(&app_config),
    );
    let callback_gateway = CallbackGateway::new(records);
    let admission = Arc::new(AdmissionController::from_config(&rate_limit_config));

    let addr: SocketAddr = app_config.bind_address().parse()?;
    let state = AppState::new(db_pool, app_config);
    let app = handlers::router(state, execution_service, callback_gateway, admission);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "Server listening");

    // Peer addresses key the per-client admission counters.
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
