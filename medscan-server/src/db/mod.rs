//! Database access for medscan-server
//!
//! A single SQLite file holds the scan records. Prediction and annotation
//! sub-records are flattened onto the `scans` row so every state change is a
//! single-row update.

pub mod scans;

use medscan_common::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

/// Initialize database connection pool
///
/// Creates the database file and tables if they don't exist.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::debug!("Connecting to database: {}", db_path.display());

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create the scans table if it doesn't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scans (
            owner_id TEXT NOT NULL,
            scan_type TEXT NOT NULL,
            custom_name TEXT NOT NULL,
            file_path TEXT NOT NULL,
            prediction_result TEXT NOT NULL DEFAULT 'Unknown',
            prediction_feedback TEXT NOT NULL DEFAULT '',
            annotation_mask_path TEXT,
            annotation_processed_path TEXT,
            annotation_remarks TEXT,
            annotation_created_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (owner_id, scan_type, custom_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (scans)");

    Ok(())
}
