//! Conversion record store
//!
//! Conversion metadata lives in `conversions`; every classified row is its own
//! record in `conversion_rows`. Appending a row inserts it (ignored when the
//! `(conversion_id, row_index)` pair already exists) and bumps
//! `processed_rows` in the same transaction, so concurrent workers neither
//! lose rows nor double count them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nacre_common::{Error, Result};
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::retry_on_lock;
use crate::db::settings::db_lock_attempts_or_default;
use crate::models::{
    Alternative, ClassificationOutcome, ClassificationResult, Conversion, ConversionPatch,
    ConversionStatus, RowClassification,
};

/// Durable per-conversion metadata and row results
#[async_trait]
pub trait ConversionStore: Send + Sync {
    /// Create a conversion in `running` state
    async fn create(&self, upload_id: &str, meta: Map<String, Value>) -> Result<Conversion>;

    /// Conversion with all its rows, `None` if unknown
    async fn get(&self, id: Uuid) -> Result<Option<Conversion>>;

    /// Apply a partial update; `stats` keys are merged
    async fn update(&self, id: Uuid, patch: ConversionPatch) -> Result<()>;

    /// Append one row; returns false when the row index was already stored
    async fn append_row(&self, id: Uuid, row: &RowClassification) -> Result<bool> {
        Ok(self.append_rows(id, std::slice::from_ref(row)).await? == 1)
    }

    /// Append rows atomically; returns how many were new
    async fn append_rows(&self, id: Uuid, rows: &[RowClassification]) -> Result<usize>;

    /// Page of rows ordered by `row_index`
    async fn rows(&self, id: Uuid, skip: usize, limit: usize) -> Result<Vec<RowClassification>>;

    /// All conversions, newest first, without rows
    async fn list(&self) -> Result<Vec<Conversion>>;
}

/// SQLite-backed [`ConversionStore`]
#[derive(Clone)]
pub struct SqliteConversionStore {
    pool: SqlitePool,
}

impl SqliteConversionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn lock_attempts(&self) -> u32 {
        db_lock_attempts_or_default(&self.pool).await
    }

    async fn insert_rows(&self, id: Uuid, rows: &[RowClassification]) -> Result<usize> {
        let conversion_id = id.to_string();
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;

        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM conversions WHERE id = ?")
            .bind(&conversion_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(Error::NotFound(format!("Conversion {}", id)));
        }

        let mut inserted = 0usize;

        for row in rows {
            let alternatives = serde_json::to_string(&row.result.alternatives)?;
            let result = sqlx::query(
                r#"
                INSERT INTO conversion_rows (
                    conversion_id, row_index, label_raw, chosen_code, chosen_category,
                    confidence, explanation, alternatives, outcome, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(conversion_id, row_index) DO NOTHING
                "#,
            )
            .bind(&conversion_id)
            .bind(row.row_index as i64)
            .bind(&row.label_raw)
            .bind(&row.result.chosen_code)
            .bind(&row.result.chosen_category)
            .bind(row.result.confidence as i64)
            .bind(&row.result.explanation)
            .bind(&alternatives)
            .bind(row.result.outcome.as_str())
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            inserted += result.rows_affected() as usize;
        }

        sqlx::query("UPDATE conversions SET processed_rows = processed_rows + ?, updated_at = ? WHERE id = ?")
            .bind(inserted as i64)
            .bind(&now)
            .bind(&conversion_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(inserted)
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse timestamp {}: {}", raw, e)))
}

fn parse_json_map(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

fn outcome_from_str(raw: &str) -> Result<ClassificationOutcome> {
    serde_json::from_value(Value::String(raw.to_string()))
        .map_err(|e| Error::Internal(format!("Unknown outcome {}: {}", raw, e)))
}

fn conversion_from_row(row: &SqliteRow) -> Result<Conversion> {
    let id: String = row.get("id");
    let status: String = row.get("status");
    let stats: String = row.get("stats");
    let meta: String = row.get("meta");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Conversion {
        id: Uuid::parse_str(&id)
            .map_err(|e| Error::Internal(format!("Invalid conversion id {}: {}", id, e)))?,
        upload_id: row.get("upload_id"),
        status: status.parse::<ConversionStatus>().map_err(Error::Internal)?,
        total_rows: row.get::<i64, _>("total_rows").max(0) as usize,
        processed_rows: row.get::<i64, _>("processed_rows").max(0) as usize,
        stats: parse_json_map(&stats)?,
        meta: parse_json_map(&meta)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        rows: Vec::new(),
    })
}

fn row_classification_from_row(row: &SqliteRow) -> Result<RowClassification> {
    let alternatives: String = row.get("alternatives");
    let alternatives: Vec<Alternative> = serde_json::from_str(&alternatives)?;
    let outcome: String = row.get("outcome");

    Ok(RowClassification {
        row_index: row.get::<i64, _>("row_index").max(0) as usize,
        label_raw: row.get("label_raw"),
        result: ClassificationResult {
            chosen_code: row.get("chosen_code"),
            chosen_category: row.get("chosen_category"),
            confidence: row.get::<i64, _>("confidence").clamp(0, 100) as u8,
            explanation: row.get("explanation"),
            alternatives,
            outcome: outcome_from_str(&outcome)?,
        },
    })
}

#[async_trait]
impl ConversionStore for SqliteConversionStore {
    async fn create(&self, upload_id: &str, meta: Map<String, Value>) -> Result<Conversion> {
        let now = Utc::now();
        let conversion = Conversion {
            id: Uuid::new_v4(),
            upload_id: upload_id.to_string(),
            status: ConversionStatus::Running,
            total_rows: 0,
            processed_rows: 0,
            stats: Map::new(),
            meta,
            created_at: now,
            updated_at: now,
            rows: Vec::new(),
        };

        sqlx::query(
            r#"
            INSERT INTO conversions (
                id, upload_id, status, total_rows, processed_rows, stats, meta, created_at, updated_at
            ) VALUES (?, ?, ?, 0, 0, '{}', ?, ?, ?)
            "#,
        )
        .bind(conversion.id.to_string())
        .bind(&conversion.upload_id)
        .bind(conversion.status.as_str())
        .bind(serde_json::to_string(&conversion.meta)?)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::debug!(conversion_id = %conversion.id, upload_id, "Conversion created");
        Ok(conversion)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Conversion>> {
        let row = sqlx::query(
            r#"
            SELECT id, upload_id, status, total_rows, processed_rows, stats, meta, created_at, updated_at
            FROM conversions
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let mut conversion = conversion_from_row(&row)?;
                conversion.rows = self.rows(id, 0, usize::MAX).await?;
                Ok(Some(conversion))
            }
            None => Ok(None),
        }
    }

    async fn update(&self, id: Uuid, patch: ConversionPatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }

        let attempts = self.lock_attempts().await;
        retry_on_lock("update conversion", attempts, || async {
            let mut tx = self.pool.begin().await?;

            let current: Option<(String,)> =
                sqlx::query_as("SELECT stats FROM conversions WHERE id = ?")
                    .bind(id.to_string())
                    .fetch_optional(&mut *tx)
                    .await?;
            let Some((stats,)) = current else {
                return Err(Error::NotFound(format!("Conversion {}", id)));
            };

            let mut stats = parse_json_map(&stats)?;
            if let Some(patch_stats) = &patch.stats {
                for (key, value) in patch_stats {
                    stats.insert(key.clone(), value.clone());
                }
            }

            sqlx::query(
                r#"
                UPDATE conversions SET
                    status = COALESCE(?, status),
                    total_rows = COALESCE(?, total_rows),
                    processed_rows = COALESCE(?, processed_rows),
                    stats = ?,
                    updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(patch.status.map(|s| s.as_str()))
            .bind(patch.total_rows.map(|n| n as i64))
            .bind(patch.processed_rows.map(|n| n as i64))
            .bind(serde_json::to_string(&stats)?)
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(())
        })
        .await
    }

    async fn append_rows(&self, id: Uuid, rows: &[RowClassification]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let attempts = self.lock_attempts().await;
        let inserted = retry_on_lock("append rows", attempts, || self.insert_rows(id, rows)).await?;

        if inserted < rows.len() {
            tracing::warn!(
                conversion_id = %id,
                duplicates = rows.len() - inserted,
                "Ignored rows already stored for this conversion"
            );
        }
        Ok(inserted)
    }

    async fn rows(&self, id: Uuid, skip: usize, limit: usize) -> Result<Vec<RowClassification>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let skip = i64::try_from(skip).unwrap_or(i64::MAX);

        let rows = sqlx::query(
            r#"
            SELECT row_index, label_raw, chosen_code, chosen_category, confidence,
                   explanation, alternatives, outcome
            FROM conversion_rows
            WHERE conversion_id = ?
            ORDER BY row_index
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(id.to_string())
        .bind(limit)
        .bind(skip)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_classification_from_row).collect()
    }

    async fn list(&self) -> Result<Vec<Conversion>> {
        let rows = sqlx::query(
            r#"
            SELECT id, upload_id, status, total_rows, processed_rows, stats, meta, created_at, updated_at
            FROM conversions
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(conversion_from_row).collect()
    }
}
