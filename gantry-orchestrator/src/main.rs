use anyhow::Context;
use gantry_core::defaults::BaseResourceTypeDefaults;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod db;
pub mod repository;
pub mod scheduler;
pub mod service;
pub mod store;

use config::{Config, StoreKind};
use scheduler::ScanWorker;
use store::{BuildLedger, CheckableStore, ConfigStore, MemoryStore, PgStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gantry_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Gantry Orchestrator...");

    let config = Config::from_env().context("failed to read configuration")?;
    config.validate().context("invalid configuration")?;

    let base_defaults = match &config.base_resource_type_defaults {
        Some(path) => BaseResourceTypeDefaults::from_yaml_file(path)
            .with_context(|| format!("failed to load base resource type defaults from {}", path.display()))?,
        None => BaseResourceTypeDefaults::default(),
    };

    match config.store {
        StoreKind::Postgres => {
            tracing::info!("Connecting to database...");
            let pool = db::create_pool(&config.database_url, config.db_max_connections)
                .await
                .context("failed to create database pool")?;
            db::run_migrations(&pool)
                .await
                .context("failed to run database migrations")?;
            tracing::info!("Database ready");

            serve(Arc::new(PgStore::new(pool)), config, base_defaults).await
        }
        StoreKind::Memory => {
            tracing::warn!("Using in-memory store, state is lost on exit");
            serve(Arc::new(MemoryStore::new()), config, base_defaults).await
        }
    }
}

async fn serve<S>(store: Arc<S>, config: Config, base_defaults: BaseResourceTypeDefaults) -> anyhow::Result<()>
where
    S: ConfigStore + CheckableStore + BuildLedger + 'static,
{
    let shutdown = CancellationToken::new();
    let state = api::AppState::new(
        store,
        base_defaults.clone(),
        config.default_check_interval,
        config.enable_pipeline_instances,
        shutdown.clone(),
    );

    let worker = ScanWorker::new(state.scanner.clone(), config.scan_interval, state.scan_notify.clone());
    let worker = tokio::spawn(worker.run(shutdown.clone()));

    if let Some(path) = config.base_resource_type_defaults.clone() {
        tokio::spawn(reload_defaults_on_hangup(base_defaults, path, shutdown.clone()));
    }

    let app = api::create_router(state);

    tracing::info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutting down...");
            signal.cancel();
        })
        .await
        .context("server error")?;

    shutdown.cancel();
    worker.await.context("scan worker failed")?;
    Ok(())
}

#[cfg(unix)]
async fn reload_defaults_on_hangup(
    defaults: BaseResourceTypeDefaults,
    path: std::path::PathBuf,
    shutdown: CancellationToken,
) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            tracing::error!("Failed to install SIGHUP handler: {}", e);
            return;
        }
    };

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            received = hangup.recv() => {
                if received.is_none() {
                    return;
                }
            }
        }

        match defaults.reload_from_file(&path) {
            Ok(types) => tracing::info!(types, "Reloaded base resource type defaults"),
            Err(e) => tracing::error!("Failed to reload base resource type defaults: {}", e),
        }
    }
}

#[cfg(not(unix))]
async fn reload_defaults_on_hangup(
    _defaults: BaseResourceTypeDefaults,
    _path: std::path::PathBuf,
    _shutdown: CancellationToken,
) {
}
