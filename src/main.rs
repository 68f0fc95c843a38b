//! m4bforge - audiobook conversion and tagging service
//!
//! Watches a source directory of per-book audio folders, concatenates them
//! into m4b audiobooks with an external encoder, and files tagged results
//! into a library tree. Controlled over a small HTTP API.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use m4bforge::services::catalog::CatalogClient;
use m4bforge::{AppState, Config};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting m4bforge");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(Config::load()?);
    config.ensure_directories()?;
    info!("Data root: {}", config.data_root.display());

    let db_path = config.database_path();
    info!("Database: {}", db_path.display());
    let db = m4bforge::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    let catalog = Arc::new(CatalogClient::new()?);

    let port = config.port;
    let state = AppState::new(config, db, catalog);
    let app = m4bforge::build_router(state);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    info!("Listening on http://127.0.0.1:{}", port);
    info!("Health check: http://127.0.0.1:{}/health", port);

    axum::serve(listener, app).await?;

    Ok(())
}
