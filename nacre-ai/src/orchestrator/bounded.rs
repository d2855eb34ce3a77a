//! Bounded-concurrency scheduler
//!
//! Rows are cut into fixed-size batches; each batch runs as a tokio task once
//! it holds a semaphore permit, so at most `max_concurrent` provider calls are
//! outstanding. Batches complete in any order; the final row list is rebuilt
//! from batch indices and always matches submission order.

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use super::{process_chunk, PreparedRow, ScheduleOutcome, Scheduler, SchedulerContext};
use crate::models::{RowClassification, SchedulerKind};
use nacre_common::{Error, Result};

/// Semaphore-bounded batch pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundedConcurrencyScheduler {
    batch_size: usize,
    max_concurrent: usize,
}

impl BoundedConcurrencyScheduler {
    pub fn new(batch_size: usize, max_concurrent: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

#[async_trait]
impl Scheduler for BoundedConcurrencyScheduler {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Bounded
    }

    fn workers(&self) -> usize {
        self.max_concurrent
    }

    async fn run(&self, rows: Vec<PreparedRow>, ctx: &SchedulerContext) -> Result<ScheduleOutcome> {
        let batches: Vec<Vec<PreparedRow>> = rows.chunks(self.batch_size).map(<[PreparedRow]>::to_vec).collect();
        let batch_count = batches.len();
        info!(
            conversion_id = %ctx.conversion_id,
            rows = rows.len(),
            batches = batch_count,
            max_concurrent = self.max_concurrent,
            "Starting bounded-concurrency pipeline"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        // Fired by the caller or by a batch whose rows could not be persisted
        let stop = ctx.cancel.child_token();
        let mut tasks = FuturesUnordered::new();

        for (batch_idx, batch) in batches.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    debug!(conversion_id = %ctx.conversion_id, batch = batch_idx, "Dispatch stopped");
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    permit.map_err(|e| Error::Internal(format!("Semaphore closed: {}", e)))?
                }
            };

            let task_ctx = ctx.clone();
            let task_stop = stop.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                let result = process_chunk(&task_ctx, &batch).await;
                match &result {
                    Ok(rows) => {
                        task_ctx.progress.advance(rows.len());
                        debug!(conversion_id = %task_ctx.conversion_id, batch = batch_idx, rows = rows.len(), "Batch persisted");
                    }
                    Err(_) => task_stop.cancel(),
                }
                (batch_idx, result)
            }));
        }

        let mut slots: Vec<Option<Vec<RowClassification>>> = (0..batch_count).map(|_| None).collect();
        let mut first_error: Option<Error> = None;

        while let Some(joined) = tasks.next().await {
            match joined {
                Ok((batch_idx, Ok(batch_rows))) => slots[batch_idx] = Some(batch_rows),
                Ok((batch_idx, Err(e))) => {
                    error!(conversion_id = %ctx.conversion_id, batch = batch_idx, error = %e, "Failed to persist batch");
                    first_error.get_or_insert(e);
                }
                Err(join_error) => {
                    error!(conversion_id = %ctx.conversion_id, error = %join_error, "Batch task panicked");
                    stop.cancel();
                    first_error.get_or_insert(Error::Internal(format!("Batch task failed: {}", join_error)));
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        Ok(ScheduleOutcome {
            rows: slots.into_iter().flatten().flatten().collect(),
            cancelled: ctx.cancel.is_cancelled(),
        })
    }
}
