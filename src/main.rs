use anyhow::{Context, Result};
use axum::Router;
use s3_catalog::{
    config::{AppConfig, BackendKind},
    handlers::AppState,
    routes::routes::routes,
    services::{
        blob::{BlobBackend, DocumentBlobBackend, FilesystemBlobBackend, MongoDocumentStore},
        catalog::Catalog,
        maintenance,
        object_store::ObjectStore,
    },
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
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

    tracing::info!(
        "Starting s3-catalog: addr={} backend={:?} database={} prefix={} schema={} remove_mode={:?}",
        cfg.addr(),
        cfg.backend,
        cfg.database_url,
        cfg.api_prefix,
        cfg.default_schema,
        cfg.remove_mode
    );

    // --- Initialize SQLite catalog ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    // Create parent directory if needed
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating catalog directory {:?}", parent))?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parsing database url `{}`", db_url))?
        .create_if_missing(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("connecting to catalog database")?,
    );
    let catalog = Catalog::new(db);
    catalog.migrate().await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Blob backend ---
    let backend: Arc<dyn BlobBackend> = match cfg.backend {
        BackendKind::Fs => {
            if !Path::new(&cfg.storage_dir).exists() {
                fs::create_dir_all(&cfg.storage_dir)?;
                tracing::info!("Created storage directory at {}", cfg.storage_dir);
            }
            Arc::new(FilesystemBlobBackend::new(&cfg.storage_dir))
        }
        BackendKind::Mongo => {
            let documents = MongoDocumentStore::connect(&cfg.mongo_uri, &cfg.mongo_database)
                .await
                .context("connecting to MongoDB")?;
            Arc::new(DocumentBlobBackend::new(Arc::new(documents)))
        }
    };

    // --- Initialize core service ---
    let store = ObjectStore::new(cfg.store_config(), catalog, backend)?;

    if let Some(plan) = cfg.sweep_plan() {
        maintenance::spawn(store.clone(), plan);
    }

    // --- Build router ---
    let state = AppState {
        store,
        default_schema: cfg.default_schema.clone(),
        max_object_size: cfg.max_object_size,
    };
    let app: Router = routes(&cfg.api_prefix, cfg.max_object_size).with_state(state);

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
