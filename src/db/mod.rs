//! Database access for m4bforge
//!
//! SQLite via sqlx; tables are created at startup if missing.

pub mod jobs;
pub mod tagged_files;

pub use jobs::{Job, JobKind, JobStatus, JobStore, JobUpdate};
pub use tagged_files::{TaggedFile, TaggedFileStore};

use crate::error::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Create an in-memory pool with the full schema, for tests.
///
/// Capped at one connection; each pooled connection to `:memory:` would
/// otherwise open its own empty database.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create jobs and tagged_files tables if they don't exist
async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'queued',
            input_paths TEXT NOT NULL,
            output_path TEXT,
            backup_paths TEXT,
            progress REAL NOT NULL DEFAULT 0.0,
            log TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            start_time TEXT,
            end_time TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tagged_files (
            id TEXT PRIMARY KEY,
            file_path TEXT NOT NULL UNIQUE,
            is_tagged INTEGER NOT NULL DEFAULT 0,
            asin TEXT,
            title TEXT,
            author TEXT,
            narrator TEXT,
            series TEXT,
            series_part TEXT,
            description TEXT,
            cover_url TEXT,
            cover_path TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (jobs, tagged_files)");

    Ok(())
}
