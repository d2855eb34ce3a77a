//! Conversion runner
//!
//! Drives one conversion end to end:
//! 1. Prepare rows (label, context, candidates), skipping empty labels
//! 2. Mark the conversion `processing` and start the selected scheduler
//! 3. Persist progress statistics as chunks land
//! 4. Finish as `completed`, `failed` (setup failure or cancellation) or
//!    `error` (rows could not be persisted)
//!
//! Rows already persisted are never rolled back.

use anyhow::{bail, Context};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{scheduler_for, PreparedRow, ProgressCallback, ProgressReporter, ProgressUpdate, SchedulerContext};
use crate::db::ConversionStore;
use crate::models::{
    ClassificationOutcome, ClassificationRequest, Conversion, ConversionParameters, ConversionPatch,
    ConversionStats, ConversionStatus, RowClassification, RowContext,
};
use crate::services::{CandidateRetriever, CatalogService, ClassificationEngine, EmbeddingIndex, RowSource};
use nacre_common::events::{EventBus, NacreEvent};
use nacre_common::{Error, Result};

/// Rows ready for scheduling
#[derive(Debug, Clone, Default)]
pub struct PreparedRows {
    pub rows: Vec<PreparedRow>,
    /// Rows whose label was blank
    pub skipped_empty_label: usize,
}

/// Runs conversions against one store, engine and catalog
#[derive(Clone)]
pub struct ConversionRunner {
    store: Arc<dyn ConversionStore>,
    engine: Arc<ClassificationEngine>,
    catalog: Arc<CatalogService>,
    embeddings: Option<Arc<EmbeddingIndex>>,
    event_bus: Option<EventBus>,
}

impl ConversionRunner {
    pub fn new(store: Arc<dyn ConversionStore>, engine: Arc<ClassificationEngine>, catalog: Arc<CatalogService>) -> Self {
        Self {
            store,
            engine,
            catalog,
            embeddings: None,
            event_bus: None,
        }
    }

    /// Embedding index used when parameters select embedding candidates
    pub fn with_embeddings(mut self, index: Arc<EmbeddingIndex>) -> Self {
        self.embeddings = Some(index);
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn store(&self) -> &Arc<dyn ConversionStore> {
        &self.store
    }

    fn emit(&self, event: NacreEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(event);
        }
    }

    /// Read the source and build one classification request per labelled row
    pub async fn prepare(&self, source: &dyn RowSource, params: &ConversionParameters) -> anyhow::Result<PreparedRows> {
        let raw_rows = source.rows().context("Failed to read row source")?;

        if !raw_rows.is_empty() && !raw_rows.iter().any(|row| row.contains_key(&params.label_column)) {
            bail!("Label column '{}' not found in source", params.label_column);
        }

        let mut retriever =
            CandidateRetriever::new(Arc::clone(&self.catalog), params.candidate_source, params.max_candidates);
        if let Some(index) = &self.embeddings {
            retriever = retriever.with_embeddings(Arc::clone(index));
        }

        let limit = params.max_rows.unwrap_or(usize::MAX);
        let mut prepared = PreparedRows::default();

        for (row_index, row) in raw_rows.into_iter().take(limit).enumerate() {
            let label_raw = row.get(&params.label_column).cloned().unwrap_or_default();
            let label = label_raw.trim();
            if label.is_empty() {
                prepared.skipped_empty_label += 1;
                continue;
            }

            let mut context = RowContext::new();
            for column in &params.context_columns {
                if let Some(value) = row.get(column) {
                    context.insert(column.clone(), value.clone());
                }
            }

            let candidates = retriever.candidates(label, &context).await;
            let request = ClassificationRequest::new(label, context, candidates);
            prepared.rows.push(PreparedRow {
                row_index,
                label_raw,
                request,
            });
        }

        Ok(prepared)
    }

    /// Create a conversion for `upload_id` and run it to a terminal status
    ///
    /// Returns the final conversion with its rows.
    pub async fn start(
        &self,
        upload_id: &str,
        source: &dyn RowSource,
        params: &ConversionParameters,
        progress: Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> Result<Conversion> {
        let mut meta = Map::new();
        meta.insert("parameters".to_string(), serde_json::to_value(params)?);
        let conversion = self.store.create(upload_id, meta).await?;

        self.run(conversion.id, upload_id, source, params, progress, cancel).await?;

        self.store
            .get(conversion.id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Conversion {}", conversion.id)))
    }

    /// Run an existing conversion to a terminal status
    ///
    /// Only a failure to record the outcome in the store is returned as `Err`;
    /// everything else ends up in the conversion's status and stats.
    pub async fn run(
        &self,
        conversion_id: Uuid,
        upload_id: &str,
        source: &dyn RowSource,
        params: &ConversionParameters,
        progress: Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> Result<ConversionStatus> {
        let prepared = match params.validate() {
            Ok(()) => self.prepare(source, params).await,
            Err(e) => Err(anyhow::Error::new(e)),
        };
        let prepared = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                let message = format!("{:#}", e);
                error!(conversion_id = %conversion_id, error = %message, "Conversion setup failed");
                return self.finish_failed(conversion_id, ConversionStatus::Failed, &message, 0, Map::new()).await;
            }
        };

        let scheduler = scheduler_for(params);
        let total = prepared.rows.len();

        let mut stats = ConversionStats::new();
        stats.insert("skipped_empty_label".into(), json!(prepared.skipped_empty_label));
        stats.insert("scheduler".into(), json!(scheduler.kind().as_str()));
        stats.insert("workers".into(), json!(scheduler.workers()));
        self.store
            .update(
                conversion_id,
                ConversionPatch::status(ConversionStatus::Processing)
                    .with_total_rows(total)
                    .with_stats(stats),
            )
            .await?;

        if total == 0 {
            info!(conversion_id = %conversion_id, "Nothing to classify, conversion completed");
            let mut stats = ConversionStats::new();
            stats.insert("total_processed".into(), json!(0));
            stats.insert("processing_time".into(), json!(0.0));
            stats.insert("average_rate".into(), json!(0.0));
            self.store
                .update(conversion_id, ConversionPatch::status(ConversionStatus::Completed).with_stats(stats))
                .await?;
            self.emit(NacreEvent::ConversionCompleted {
                conversion_id,
                processed: 0,
                duration_seconds: 0.0,
                timestamp: chrono::Utc::now(),
            });
            return Ok(ConversionStatus::Completed);
        }

        info!(
            conversion_id = %conversion_id,
            rows = total,
            skipped = prepared.skipped_empty_label,
            scheduler = scheduler.kind().as_str(),
            workers = scheduler.workers(),
            "Conversion started"
        );
        self.emit(NacreEvent::ConversionStarted {
            conversion_id,
            upload_id: upload_id.to_string(),
            total_rows: total,
            scheduler: scheduler.kind().as_str().to_string(),
            timestamp: chrono::Utc::now(),
        });

        // Progress fans out to the caller, the event bus and the store writer
        let (progress_tx, progress_rx) = mpsc::unbounded_channel::<ProgressUpdate>();
        let writer = tokio::spawn(write_progress(Arc::clone(&self.store), conversion_id, progress_rx));
        let event_bus = self.event_bus.clone();
        let callback: ProgressCallback = Arc::new(move |update: ProgressUpdate| {
            if let Some(cb) = &progress {
                cb(update);
            }
            if let Some(bus) = &event_bus {
                bus.emit_lossy(NacreEvent::ConversionProgress {
                    conversion_id,
                    processed: update.items_processed,
                    total: update.total_items,
                    percentage: update.percentage() as f32,
                    elapsed_seconds: update.elapsed_seconds,
                    rate: update.rate(),
                    timestamp: chrono::Utc::now(),
                });
            }
            let _ = progress_tx.send(update);
        });

        let ctx = SchedulerContext {
            conversion_id,
            engine: Arc::clone(&self.engine),
            store: Arc::clone(&self.store),
            progress: ProgressReporter::new(total, Some(callback)),
            cancel,
        };

        let outcome = scheduler.run(prepared.rows, &ctx).await;
        let processed = ctx.progress.processed();
        let elapsed = ctx.progress.elapsed_seconds();

        // Last sender goes with the context; the writer then drains and exits
        drop(ctx);
        if let Err(e) = writer.await {
            warn!(conversion_id = %conversion_id, error = %e, "Progress writer task failed");
        }

        let mut stats = ConversionStats::new();
        stats.insert("total_processed".into(), json!(processed));
        stats.insert("processing_time".into(), json!(round2(elapsed)));
        stats.insert("average_rate".into(), json!(round2(rate(processed, elapsed))));

        match outcome {
            Err(e) => {
                error!(conversion_id = %conversion_id, error = %e, processed, "Conversion aborted");
                self.finish_failed(conversion_id, ConversionStatus::Error, &e.to_string(), processed, stats)
                    .await
            }
            Ok(outcome) if outcome.cancelled => {
                warn!(conversion_id = %conversion_id, processed, total, "Conversion cancelled");
                stats.extend(outcome_stats(&outcome.rows));
                self.finish_failed(conversion_id, ConversionStatus::Failed, "cancelled", processed, stats)
                    .await
            }
            Ok(outcome) => {
                stats.extend(outcome_stats(&outcome.rows));
                self.store
                    .update(conversion_id, ConversionPatch::status(ConversionStatus::Completed).with_stats(stats))
                    .await?;
                info!(
                    conversion_id = %conversion_id,
                    processed,
                    elapsed_seconds = round2(elapsed),
                    "Conversion completed"
                );
                self.emit(NacreEvent::ConversionCompleted {
                    conversion_id,
                    processed,
                    duration_seconds: elapsed,
                    timestamp: chrono::Utc::now(),
                });
                Ok(ConversionStatus::Completed)
            }
        }
    }

    async fn finish_failed(
        &self,
        conversion_id: Uuid,
        status: ConversionStatus,
        message: &str,
        processed: usize,
        mut stats: ConversionStats,
    ) -> Result<ConversionStatus> {
        stats.insert("error".into(), Value::String(message.to_string()));
        self.store
            .update(conversion_id, ConversionPatch::status(status).with_stats(stats))
            .await?;
        self.emit(NacreEvent::ConversionFailed {
            conversion_id,
            error: message.to_string(),
            processed,
            timestamp: chrono::Utc::now(),
        });
        Ok(status)
    }
}

/// Persist running statistics; only the latest pending update is written
async fn write_progress(
    store: Arc<dyn ConversionStore>,
    conversion_id: Uuid,
    mut updates: mpsc::UnboundedReceiver<ProgressUpdate>,
) {
    while let Some(mut update) = updates.recv().await {
        while let Ok(newer) = updates.try_recv() {
            update = newer;
        }

        let mut stats = ConversionStats::new();
        stats.insert("processing_rate".into(), json!(round2(update.rate())));
        stats.insert("progress_pct".into(), json!(round2(update.percentage())));
        stats.insert("elapsed_time".into(), json!(round2(update.elapsed_seconds)));

        let patch = ConversionPatch {
            stats: Some(stats),
            ..Default::default()
        };
        if let Err(e) = store.update(conversion_id, patch).await {
            warn!(conversion_id = %conversion_id, error = %e, "Failed to record progress");
        }
    }
}

/// Outcome counters over the persisted rows
fn outcome_stats(rows: &[RowClassification]) -> ConversionStats {
    let count = |outcome: ClassificationOutcome| rows.iter().filter(|r| r.result.outcome == outcome).count();

    let mut stats = ConversionStats::new();
    stats.insert("errors".into(), json!(count(ClassificationOutcome::Fallback)));
    stats.insert("corrected".into(), json!(count(ClassificationOutcome::Corrected)));
    stats.insert("unclassifiable".into(), json!(count(ClassificationOutcome::Unclassifiable)));
    stats
}

fn rate(processed: usize, elapsed: f64) -> f64 {
    if elapsed > 0.0 {
        processed as f64 / elapsed
    } else {
        0.0
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CatalogEntry;

    fn row(index: usize, outcome: ClassificationOutcome) -> RowClassification {
        let mut result = crate::models::ClassificationResult::unclassifiable();
        result.outcome = outcome;
        RowClassification::new(index, "x", result)
    }

    #[test]
    fn test_outcome_stats() {
        let rows = vec![
            row(0, ClassificationOutcome::Fallback),
            row(1, ClassificationOutcome::Fallback),
            row(2, ClassificationOutcome::Corrected),
            row(3, ClassificationOutcome::Provider),
            row(4, ClassificationOutcome::Unclassifiable),
        ];
        let stats = outcome_stats(&rows);
        assert_eq!(stats["errors"], json!(2));
        assert_eq!(stats["corrected"], json!(1));
        assert_eq!(stats["unclassifiable"], json!(1));
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(1.23456), 1.23);
        assert_eq!(rate(10, 0.0), 0.0);
        assert_eq!(rate(10, 4.0), 2.5);
    }

    #[tokio::test]
    async fn test_prepare_skips_blank_labels_and_builds_context() {
        use crate::db::{test_pool, SqliteConversionStore};
        use crate::services::{Catalog, VecRowSource};
        use crate::utils::RetryPolicy;

        let (_dir, pool) = test_pool().await;
        let catalog = Catalog::from_entries(vec![CatalogEntry::new("AB.01", "Fournitures", vec!["papier".into()])]);
        let runner = ConversionRunner::new(
            Arc::new(SqliteConversionStore::new(pool)),
            Arc::new(ClassificationEngine::new(None, None, RetryPolicy::no_retry())),
            Arc::new(CatalogService::with_catalog("unused.csv", catalog)),
        );

        let mut rows = Vec::new();
        for (label, supplier) in [("Achat papier", "Bureau Vallée"), ("   ", "x"), ("Ramettes", "")] {
            let mut row = crate::utils::RawRow::new();
            row.insert("libelle".into(), label.into());
            row.insert("fournisseur".into(), supplier.into());
            row.insert("ignored".into(), "y".into());
            rows.push(row);
        }

        let mut params = ConversionParameters::new("libelle");
        params.context_columns = vec!["fournisseur".into()];
        let prepared = runner.prepare(&VecRowSource::new(rows.clone()), &params).await.unwrap();

        assert_eq!(prepared.skipped_empty_label, 1);
        assert_eq!(prepared.rows.len(), 2);
        assert_eq!(prepared.rows[1].row_index, 2);
        assert_eq!(prepared.rows[0].request.context.supplier(), Some("Bureau Vallée"));
        assert!(prepared.rows[1].request.context.is_empty());
        assert_eq!(prepared.rows[0].request.candidates.len(), 1);

        params.max_rows = Some(1);
        assert_eq!(runner.prepare(&VecRowSource::new(rows.clone()), &params).await.unwrap().rows.len(), 1);

        let missing = ConversionParameters::new("label");
        assert!(runner.prepare(&VecRowSource::new(rows), &missing).await.is_err());
    }
}
