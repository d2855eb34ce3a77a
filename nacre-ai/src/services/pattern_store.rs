//! Pattern store: learned (context → code) frequencies
//!
//! Every classified row with a supplier or account in its context bumps that
//! value's count and mean confidence for the chosen code. The heuristic scorer
//! reads these back as additive boosts; the provider path never does.

use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::db::patterns::{load_stats, record_observation};
use crate::db::retry_on_lock;
use crate::db::settings::db_lock_attempts_or_default;
use crate::models::RowContext;
use nacre_common::Result;

/// Context attribute a pattern is keyed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    Supplier,
    Account,
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::Supplier => "supplier",
            PatternKind::Account => "account",
        }
    }
}

/// Non-empty (kind, normalised value) pairs present in a context
fn pattern_keys(context: &RowContext) -> Vec<(PatternKind, String)> {
    [
        (PatternKind::Supplier, context.supplier()),
        (PatternKind::Account, context.account()),
    ]
    .into_iter()
    .filter_map(|(kind, value)| {
        let key = value?.trim().to_lowercase();
        (!key.is_empty()).then_some((kind, key))
    })
    .collect()
}

/// SQLite-backed pattern store
#[derive(Clone)]
pub struct PatternStore {
    pool: SqlitePool,
}

impl PatternStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a classification for every supplier/account in `context`
    ///
    /// No-op when neither is present.
    pub async fn update(&self, context: &RowContext, chosen_code: &str, confidence: u8) -> Result<()> {
        let keys = pattern_keys(context);
        if keys.is_empty() {
            return Ok(());
        }

        let attempts = db_lock_attempts_or_default(&self.pool).await;
        for (kind, key) in keys {
            retry_on_lock("pattern update", attempts, || {
                record_observation(&self.pool, kind.as_str(), &key, chosen_code, confidence)
            })
            .await?;
        }
        Ok(())
    }

    /// code → Σ count × avg_confidence / 100 across the context's supplier and account
    pub async fn boosts(&self, context: &RowContext) -> Result<HashMap<String, f64>> {
        let mut weights: HashMap<String, f64> = HashMap::new();

        for (kind, key) in pattern_keys(context) {
            for stat in load_stats(&self.pool, kind.as_str(), &key).await? {
                *weights.entry(stat.code).or_default() +=
                    stat.count as f64 * (stat.avg_confidence / 100.0);
            }
        }

        Ok(weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::settings::{set_setting, DB_LOCK_ATTEMPTS_KEY};
    use crate::db::test_pool;

    #[test]
    fn test_pattern_keys_normalised() {
        let context = RowContext::new()
            .with("Fournisseur", "  Bureau VALLEE ")
            .with("compte", "606400")
            .with("montant", "12");
        assert_eq!(
            pattern_keys(&context),
            vec![
                (PatternKind::Supplier, "bureau vallee".to_string()),
                (PatternKind::Account, "606400".to_string())
            ]
        );
        assert!(pattern_keys(&RowContext::new().with("montant", "3")).is_empty());
    }

    #[tokio::test]
    async fn test_update_then_boosts() {
        let (_dir, pool) = test_pool().await;
        let store = PatternStore::new(pool);
        let context = RowContext::new().with("supplier", "Bureau Vallée").with("account", "606400");

        for confidence in [60, 80, 100] {
            store.update(&context, "AB.01", confidence).await.unwrap();
        }
        store
            .update(&RowContext::new().with("supplier", "bureau vallée"), "TR.02", 50)
            .await
            .unwrap();

        let boosts = store.boosts(&context).await.unwrap();
        // supplier: 3 × 0.8, account: 3 × 0.8
        assert!((boosts["AB.01"] - 4.8).abs() < 1e-9);
        assert!((boosts["TR.02"] - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_update_without_keys_is_noop() {
        let (_dir, pool) = test_pool().await;
        let store = PatternStore::new(pool.clone());
        store.update(&RowContext::new().with("montant", "10"), "AB.01", 90).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pattern_stats")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert!(store.boosts(&RowContext::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_honours_lock_attempts_setting() {
        let (_dir, pool) = test_pool().await;
        let store = PatternStore::new(pool.clone());
        let context = RowContext::new().with("supplier", "SNCF");

        set_setting(&pool, DB_LOCK_ATTEMPTS_KEY, 1).await.unwrap();
        store.update(&context, "TR.02", 70).await.unwrap();

        set_setting(&pool, DB_LOCK_ATTEMPTS_KEY, "many").await.unwrap();
        store.update(&context, "TR.02", 90).await.unwrap();

        let boosts = store.boosts(&context).await.unwrap();
        // 2 × 0.8
        assert!((boosts["TR.02"] - 1.6).abs() < 1e-9);
    }
}
