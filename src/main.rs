use anyhow::{Context, Result};
use axum::{Router, extract::DefaultBodyLimit};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod store;
#[cfg(test)]
mod test_support;

use config::{AppConfig, Backend};
use errors::TransitError;
use services::{
    AppState, context::TransitContext, sweep_service::SweepService, upload_service::UploadService,
};
use store::{DiskStore, MemoryStore, ObjectStore};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;
    tracing::info!("Starting file-transit with config: {:?}", cfg);

    let store = match open_store(&cfg, migrate).await {
        Ok(Some(store)) => store,
        Ok(None) => {
            tracing::info!("Database migration complete.");
            return Ok(()); // exit after migration
        }
        Err(err) => {
            tracing::error!(error = %err, "object store unavailable");
            return Err(err.into());
        }
    };

    // --- Initialize services ---
    let retention = chrono::Duration::from_std(cfg.retention).context("retention window")?;
    let ctx = TransitContext::new(store, cfg.bucket.clone(), cfg.store_timeout);
    let state = AppState {
        uploads: UploadService::new(ctx.clone(), cfg.public_base_url.clone()),
        sweeper: SweepService::new(ctx.clone(), retention, cfg.sweep_concurrency)
            .with_page_size(cfg.sweep_page_size),
        ctx,
    };

    if let Some(period) = cfg.sweep_interval {
        tracing::info!(?period, "scheduling in-process retention sweeps");
        let _sweeps = state.sweeper.clone().spawn_periodic(period);
    }

    // --- Build router ---
    let app: Router = routes::routes::routes()
        .layer(DefaultBodyLimit::max(cfg.max_upload_bytes))
        .with_state(state);

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
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_failed(what: &str, err: impl std::fmt::Display) -> TransitError {
    TransitError::StoreClientInitFailed(format!("{}: {}", what, err))
}

/// Build the configured backend. Returns `None` when only a migration was
/// requested.
async fn open_store(
    cfg: &AppConfig,
    migrate: bool,
) -> Result<Option<Arc<dyn ObjectStore>>, TransitError> {
    if cfg.backend == Backend::Memory {
        if migrate {
            tracing::warn!("--migrate has no effect on the memory backend");
            return Ok(None);
        }
        let store =
            MemoryStore::new(cfg.default_bucket.clone()).map_err(|e| init_failed("memory", e))?;
        return Ok(Some(Arc::new(store)));
    }

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir).map_err(|e| init_failed("storage dir", e))?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let options = SqliteConnectOptions::from_str(&cfg.database_url)
        .map_err(|e| init_failed("database url", e))?
        .create_if_missing(true);
    if let Some(parent) = options.get_filename().parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| init_failed("database dir", e))?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    let db = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| init_failed("database", e))?;

    let store = DiskStore::new(Arc::new(db), &cfg.storage_dir, cfg.default_bucket.clone())
        .map_err(|e| init_failed("disk store", e))?;
    store
        .migrate()
        .await
        .map_err(|e| init_failed("migration", e))?;
    if migrate {
        return Ok(None);
    }
    Ok(Some(Arc::new(store)))
}
