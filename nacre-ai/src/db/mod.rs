//! Database access for nacre-ai
//!
//! One SQLite file in the root folder holds conversions, their rows, learned
//! pattern statistics and key-value settings.

pub mod conversions;
pub mod patterns;
pub mod settings;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub use conversions::{ConversionStore, SqliteConversionStore};

/// Initialize database connection pool
///
/// Connects to `nacre.db` (created if missing) and creates tables.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Use proper SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    // WAL lets progress readers proceed while workers append rows
    let options = SqliteConnectOptions::from_str(&db_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create nacre-ai tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversions (
            id TEXT PRIMARY KEY,
            upload_id TEXT NOT NULL,
            status TEXT NOT NULL,
            total_rows INTEGER NOT NULL DEFAULT 0,
            processed_rows INTEGER NOT NULL DEFAULT 0,
            stats TEXT NOT NULL DEFAULT '{}',
            meta TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per classified source row; the primary key makes appends idempotent
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversion_rows (
            conversion_id TEXT NOT NULL REFERENCES conversions(id) ON DELETE CASCADE,
            row_index INTEGER NOT NULL,
            label_raw TEXT NOT NULL,
            chosen_code TEXT NOT NULL,
            chosen_category TEXT NOT NULL,
            confidence INTEGER NOT NULL,
            explanation TEXT,
            alternatives TEXT NOT NULL DEFAULT '[]',
            outcome TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (conversion_id, row_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // kind = 'supplier' | 'account', key = normalised context value
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pattern_stats (
            kind TEXT NOT NULL,
            key TEXT NOT NULL,
            code TEXT NOT NULL,
            count INTEGER NOT NULL,
            avg_confidence REAL NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (kind, key, code)
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (settings, conversions, conversion_rows, pattern_stats)");

    Ok(())
}

/// Retry a database write while SQLite reports the database locked
///
/// Other errors fail immediately.
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_attempts: u32,
    operation: F,
) -> nacre_common::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = nacre_common::Result<T>>,
{
    crate::utils::retry_with_backoff(
        operation_name,
        &crate::utils::RetryPolicy::database_lock(max_attempts),
        nacre_common::Error::is_database_locked,
        operation,
    )
    .await
}

/// Temporary on-disk database for unit tests
///
/// The returned `TempDir` must outlive the pool.
#[cfg(test)]
pub(crate) async fn test_pool() -> (tempfile::TempDir, SqlitePool) {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let pool = init_database_pool(&temp_dir.path().join("nacre.db"))
        .await
        .unwrap();
    (temp_dir, pool)
}
