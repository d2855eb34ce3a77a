//! Pattern statistics database operations
//!
//! Each (kind, key, code) triple holds a count and a running mean confidence.
//! Updates are a single UPSERT computing the incremental mean in SQL, so
//! concurrent writers never lose an update.

use nacre_common::{Error, Result};
use sqlx::{Row, SqlitePool};

/// Statistics for one code under one context value
#[derive(Debug, Clone, PartialEq)]
pub struct PatternStat {
    pub code: String,
    pub count: u64,
    pub avg_confidence: f64,
}

/// Record one observation: count + 1, mean updated as
/// `(avg * count + confidence) / (count + 1)`, rounded to 2 decimals
pub async fn record_observation(
    pool: &SqlitePool,
    kind: &str,
    key: &str,
    code: &str,
    confidence: u8,
) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO pattern_stats (kind, key, code, count, avg_confidence, updated_at)
        VALUES (?, ?, ?, 1, ?, ?)
        ON CONFLICT(kind, key, code) DO UPDATE SET
            avg_confidence = ROUND(
                (pattern_stats.avg_confidence * pattern_stats.count + excluded.avg_confidence)
                    / (pattern_stats.count + 1),
                2
            ),
            count = pattern_stats.count + 1,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(kind)
    .bind(key)
    .bind(code)
    .bind(confidence as f64)
    .bind(&now)
    .execute(pool)
    .await
    .map_err(Error::Database)?;

    Ok(())
}

/// All code statistics recorded under (kind, key)
pub async fn load_stats(pool: &SqlitePool, kind: &str, key: &str) -> Result<Vec<PatternStat>> {
    let rows = sqlx::query(
        "SELECT code, count, avg_confidence FROM pattern_stats WHERE kind = ? AND key = ? ORDER BY code",
    )
    .bind(kind)
    .bind(key)
    .fetch_all(pool)
    .await
    .map_err(Error::Database)?;

    Ok(rows
        .into_iter()
        .map(|row| PatternStat {
            code: row.get("code"),
            count: row.get::<i64, _>("count").max(0) as u64,
            avg_confidence: row.get("avg_confidence"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_incremental_mean() {
        let (_dir, pool) = test_pool().await;

        for confidence in [60, 80, 100] {
            record_observation(&pool, "supplier", "bureau vallee", "AB.01", confidence)
                .await
                .unwrap();
        }

        let stats = load_stats(&pool, "supplier", "bureau vallee").await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].count, 3);
        assert!((stats[0].avg_confidence - 80.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_mean_rounded_to_two_decimals() {
        let (_dir, pool) = test_pool().await;
        for confidence in [50, 50, 51] {
            record_observation(&pool, "account", "606400", "AB.01", confidence)
                .await
                .unwrap();
        }
        let stats = load_stats(&pool, "account", "606400").await.unwrap();
        assert!((stats[0].avg_confidence - 50.33).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let (_dir, pool) = test_pool().await;
        record_observation(&pool, "supplier", "edf", "EN.03", 90).await.unwrap();
        record_observation(&pool, "account", "edf", "AB.01", 40).await.unwrap();

        let stats = load_stats(&pool, "supplier", "edf").await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].code, "EN.03");
        assert!(load_stats(&pool, "supplier", "la poste").await.unwrap().is_empty());
    }
}
