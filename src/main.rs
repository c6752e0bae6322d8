use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{io::ErrorKind, net::SocketAddr, path::Path, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod middleware;
mod models;
mod routes;
mod services;
mod state;

use config::{AppConfig, RunMode};
use services::{
    byte_store::ByteStore, metadata_store::MetadataStore, storage_service::StorageService,
};
use state::{AppState, AuthSettings};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + run mode ---
    let (cfg, mode) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting file-vault with config: {:?}", cfg);
    if cfg.api_key.is_empty() {
        tracing::warn!("api_key is empty; every authenticated route will answer 401");
    }

    // --- Ensure storage directory exists ---
    let bytes = ByteStore::new(&cfg.data_dir);
    bytes
        .init()
        .await
        .with_context(|| format!("creating data directory `{}`", cfg.data_dir))?;
    tracing::debug!("Data directory ready at {}", cfg.data_dir);

    // --- Initialize SQLite connection ---
    let db_path = Path::new(&cfg.db_path);
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("opening database `{}`", cfg.db_path))?,
    );

    let metadata = MetadataStore::new(db.clone());
    metadata.migrate().await.context("running migrations")?;

    // --- Handle one-shot modes ---
    let storage = StorageService::new(metadata, bytes);
    match mode {
        RunMode::Migrate => {
            tracing::info!("Database migration complete.");
            return Ok(());
        }
        RunMode::Reconcile => {
            let report = storage.reconcile().await?;
            tracing::info!(
                "Reconcile complete: {} orphan records removed, {} staged files purged",
                report.orphan_records_removed,
                report.staged_files_purged
            );
            return Ok(());
        }
        RunMode::Serve => {}
    }

    if let Some(secs) = cfg.reconcile_interval_secs {
        spawn_reconciler(storage.clone(), Duration::from_secs(secs));
    }

    // --- Build router ---
    let state = AppState::new(storage, AuthSettings::from(&cfg));
    let app = routes::routes::routes(state, cfg.assets_dir.as_ref().map(Into::into));

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

/// Periodically sweep orphan records and stale staged uploads.
fn spawn_reconciler(storage: StorageService, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(err) = storage.reconcile().await {
                tracing::warn!("periodic reconcile failed: {}", err);
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
