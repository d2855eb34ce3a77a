//! Settings database operations
//!
//! Key-value accessors over the `settings` table.

use nacre_common::{Error, Result};
use sqlx::{Pool, Sqlite};

/// Setting key: attempts allowed when SQLite reports the database locked
pub const DB_LOCK_ATTEMPTS_KEY: &str = "db_max_lock_attempts";

/// Default for [`DB_LOCK_ATTEMPTS_KEY`]
pub const DEFAULT_DB_LOCK_ATTEMPTS: u32 = 20;

/// Get lock retry budget for row appends and pattern updates
///
/// **Default:** 20 attempts (10ms doubling backoff, capped at 1000ms)
pub async fn get_db_lock_attempts(db: &Pool<Sqlite>) -> Result<u32> {
    get_setting(db, DB_LOCK_ATTEMPTS_KEY)
        .await
        .map(|opt| opt.unwrap_or(DEFAULT_DB_LOCK_ATTEMPTS).max(1))
}

/// Lock retry budget, falling back to the default when the setting is unreadable
pub async fn db_lock_attempts_or_default(db: &Pool<Sqlite>) -> u32 {
    match get_db_lock_attempts(db).await {
        Ok(attempts) => attempts,
        Err(e) => {
            tracing::warn!(error = %e, "Unreadable lock retry setting, using default");
            DEFAULT_DB_LOCK_ATTEMPTS
        }
    }
}

/// Generic setting getter
pub async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match row {
        Some((value,)) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting {} failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Generic setting setter (upsert)
pub async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}
