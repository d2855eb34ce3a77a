//! Database Test Utilities
//!
//! Temporary SQLite databases with the nacre-ai tables created

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;

use nacre_ai::db::{ConversionStore, SqliteConversionStore};

/// Create temporary test database with tables created
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test_nacre.db");

    let pool = nacre_ai::db::init_database_pool(&db_path).await?;

    Ok((temp_dir, pool))
}

/// Conversion store over a fresh temporary database
pub async fn create_test_store() -> Result<(TempDir, SqlitePool, Arc<dyn ConversionStore>)> {
    let (temp_dir, pool) = create_test_db().await?;
    let store: Arc<dyn ConversionStore> = Arc::new(SqliteConversionStore::new(pool.clone()));
    Ok((temp_dir, pool, store))
}
