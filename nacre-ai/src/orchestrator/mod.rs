//! Conversion orchestration
//!
//! A conversion prepares its rows (label, context, candidates), then hands
//! them to a [`Scheduler`]. Both schedulers classify rows in chunks through
//! the shared [`ClassificationEngine`], persist each chunk once its final
//! result is known, and feed the pattern store afterwards.
//!
//! - [`BoundedConcurrencyScheduler`]: async tasks bounded by a semaphore,
//!   output in submission order
//! - [`WorkerPoolScheduler`]: OS worker threads pulling tasks from a queue,
//!   output in arrival order (rows keep their `row_index`)

pub mod bounded;
pub mod progress;
pub mod runner;
pub mod worker_pool;

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::ConversionStore;
use crate::models::{
    bounded_max_concurrent, worker_pool_preset, ClassificationRequest, ConversionParameters,
    RowClassification, SchedulerKind,
};
use crate::services::ClassificationEngine;
use nacre_common::Result;

pub use bounded::BoundedConcurrencyScheduler;
pub use progress::{ProgressCallback, ProgressReporter, ProgressUpdate};
pub use runner::{ConversionRunner, PreparedRows};
pub use worker_pool::WorkerPoolScheduler;

/// One source row ready for classification
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRow {
    /// 0-based position in the source
    pub row_index: usize,
    /// Label exactly as read from the source
    pub label_raw: String,
    pub request: ClassificationRequest,
}

/// Everything a scheduler needs to process rows of one conversion
#[derive(Clone)]
pub struct SchedulerContext {
    pub conversion_id: Uuid,
    pub engine: Arc<ClassificationEngine>,
    pub store: Arc<dyn ConversionStore>,
    pub progress: ProgressReporter,
    pub cancel: CancellationToken,
}

/// Rows persisted by a scheduler run
#[derive(Debug, Clone, Default)]
pub struct ScheduleOutcome {
    /// Submission order for the bounded scheduler, arrival order for the pool
    pub rows: Vec<RowClassification>,
    /// Dispatch stopped early because the cancellation token fired
    pub cancelled: bool,
}

/// Strategy running the prepared rows of one conversion
#[async_trait]
pub trait Scheduler: Send + Sync {
    fn kind(&self) -> SchedulerKind;

    /// Concurrent batches (bounded) or worker threads (pool)
    fn workers(&self) -> usize;

    /// Classify and persist `rows`
    ///
    /// Returns `Err` when persisting a chunk fails; chunks persisted before
    /// the failure stay persisted.
    async fn run(&self, rows: Vec<PreparedRow>, ctx: &SchedulerContext) -> Result<ScheduleOutcome>;
}

/// Scheduler selected by the conversion parameters
pub fn scheduler_for(params: &ConversionParameters) -> Box<dyn Scheduler> {
    match params.scheduler {
        SchedulerKind::Bounded => Box::new(BoundedConcurrencyScheduler::new(
            params.batch_size,
            bounded_max_concurrent(params.batch_size),
        )),
        SchedulerKind::WorkerPool => {
            let preset = worker_pool_preset(params.speed);
            Box::new(WorkerPoolScheduler::new(preset.workers, preset.items_per_task))
        }
    }
}

/// Classify one chunk, persist it, then learn from it
///
/// Rows are appended only after the chunk's final (possibly fallback) results
/// exist, so provider retries never persist a row twice.
pub(crate) async fn process_chunk(ctx: &SchedulerContext, chunk: &[PreparedRow]) -> Result<Vec<RowClassification>> {
    let requests: Vec<ClassificationRequest> = chunk.iter().map(|row| row.request.clone()).collect();
    let results = ctx.engine.classify_batch(&requests).await;

    let rows: Vec<RowClassification> = chunk
        .iter()
        .zip(results)
        .map(|(row, result)| RowClassification::new(row.row_index, row.label_raw.clone(), result))
        .collect();

    let appended = ctx.store.append_rows(ctx.conversion_id, &rows).await?;
    if appended != rows.len() {
        tracing::debug!(
            conversion_id = %ctx.conversion_id,
            appended,
            chunk = rows.len(),
            "Some rows were already persisted"
        );
    }

    for (row, prepared) in rows.iter().zip(chunk) {
        if let Err(e) = ctx.engine.learn(&prepared.request, &row.result).await {
            tracing::warn!(
                conversion_id = %ctx.conversion_id,
                row_index = row.row_index,
                error = %e,
                "Pattern update failed"
            );
        }
    }

    Ok(rows)
}
