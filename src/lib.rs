//! m4bforge library interface
//!
//! Converts folders of audio files into single m4b audiobooks, tracks the
//! work as database-backed jobs, and tags the results with catalog metadata.

pub mod api;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod pipeline;
pub mod services;

pub use crate::config::Config;
pub use crate::error::{ApiError, ApiResult, Error, Result};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::services::catalog::CatalogClient;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Runtime configuration, directory layout included
    pub config: Arc<Config>,
    /// Database connection pool
    pub db: SqlitePool,
    /// Catalog client, shared so its HTTP connection pool is reused
    pub catalog: Arc<CatalogClient>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: Arc<Config>, db: SqlitePool, catalog: Arc<CatalogClient>) -> Self {
        Self {
            config,
            db,
            catalog,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::job_routes())
        .merge(api::file_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
