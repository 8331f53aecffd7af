use anyhow::{Context, Result};
use axum::Router;
use object_browser::{
    config::{AppConfig, BackendKind},
    routes,
    services::{BrowserService, metadata::BucketMetadataStore},
    store::{InMemoryStore, ObjectStore, S3Backend},
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;
    tracing::info!("Starting object-browser with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    ensure_sqlite_parent(db_url)?;
    let options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parsing database url {db_url}"))?
        .create_if_missing(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("connecting to {db_url}"))?,
    );
    let metadata = BucketMetadataStore::new(db);

    // --- Apply schema (idempotent) ---
    metadata.migrate().await?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize object store + service ---
    let store: Arc<dyn ObjectStore> = match cfg.backend {
        BackendKind::S3 => Arc::new(S3Backend::new(cfg.s3.clone())?),
        BackendKind::Memory => {
            tracing::warn!("Using the in-memory backend, objects are lost on exit");
            let store = InMemoryStore::new();
            Arc::new(match cfg.list_page_size {
                Some(size) => store.with_page_size(size),
                None => store,
            })
        }
    };
    let service = BrowserService::new(store, metadata).with_presign_ttl(cfg.presign_ttl);

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(service);

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

/// Create the directory holding a file-backed SQLite database.
fn ensure_sqlite_parent(db_url: &str) -> Result<()> {
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if db_path.starts_with(":memory:") {
        return Ok(());
    }
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    Ok(())
}
