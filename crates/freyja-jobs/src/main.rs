//! freyja-migrate - background worker moving files out of the legacy store

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use freyja_db::{Database, FilesystemStorage, PgQueryService, PoolConfig, StoreRole};
use freyja_jobs::{
    FederatedQueryService, LegacyContentLocator, MigrateFilesHandler, MigrationConfig,
    MigrationTrigger, MigrationWorker, PairtreeDerivativePaths, ResourceFactory, WorkerBuilder,
    WorkerConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter (default: "freyja_jobs=info,freyja_db=info")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "freyja_jobs=info,freyja_db=info,freyja_query=info".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("freyja-migrate.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    // Configuration
    let config = MigrationConfig::from_env().context("invalid migration configuration")?;
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/freyja".to_string());
    let legacy_database_url = std::env::var("LEGACY_DATABASE_URL")
        .ok()
        .filter(|v| !v.is_empty());

    let db = Database::connect(&database_url, PoolConfig::from_env(StoreRole::Primary))
        .await
        .context("failed to connect to the primary database")?;
    db.migrate().await.context("failed to run migrations")?;
    info!(subsystem = "db", "Primary database ready");

    // Every materialized resource runs the trigger.
    let trigger = Arc::new(
        MigrationTrigger::new(Arc::new(db.presence.clone()), db.jobs.clone())
            .with_policy(config.policy),
    );
    let factory = ResourceFactory::new().with_hook(trigger);
    let primary: Arc<PgQueryService> = Arc::new(db.query_service(factory.clone()));

    let storage = FilesystemStorage::new(&config.storage_path);
    storage
        .validate()
        .await
        .map_err(|e| anyhow::anyhow!("storage directory is not usable: {}", e))?;
    let derivatives = Arc::new(PairtreeDerivativePaths::new(&config.derivatives_path));
    let content = Arc::new(LegacyContentLocator::new(config.legacy.clone())?);

    let worker = match legacy_database_url {
        Some(url) => {
            let legacy_db = Database::connect(&url, PoolConfig::from_env(StoreRole::Legacy))
                .await
                .context("failed to connect to the legacy database")?;
            let legacy: Arc<PgQueryService> = Arc::new(legacy_db.query_service(factory));
            let router = Arc::new(FederatedQueryService::new(primary.clone(), legacy));
            info!(subsystem = "query", "Federated reads over primary and legacy");
            MigrationWorker::with_filesystem(router, primary, storage, derivatives, content)
        }
        None => {
            info!(subsystem = "query", "LEGACY_DATABASE_URL not set, reading primary only");
            MigrationWorker::with_filesystem(primary.clone(), primary, storage, derivatives, content)
        }
    };
    let worker = Arc::new(worker);

    let worker_config = WorkerConfig::from_env();
    info!(
        subsystem = "jobs",
        policy = config.policy.as_str(),
        legacy_prefix = %config.legacy.prefix,
        storage_path = %config.storage_path.display(),
        derivatives_path = %config.derivatives_path.display(),
        max_concurrent = worker_config.max_concurrent_jobs,
        "Starting migration worker"
    );

    let handle = WorkerBuilder::new(db.jobs.clone())
        .with_config(worker_config)
        .with_wakeup(db.jobs.job_notify())
        .with_handler(MigrateFilesHandler::new(worker))
        .build()
        .await
        .start();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!(subsystem = "jobs", "Shutdown signal received");

    handle.shutdown().await?;
    Ok(())
}
