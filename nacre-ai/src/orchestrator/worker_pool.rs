//! Worker-thread pool scheduler
//!
//! Rows are cut into small tasks pushed onto a shared queue. A fixed number of
//! OS threads each pop a task, run it to completion on the runtime handle
//! (classify, persist, learn) and report back over a channel. Results arrive
//! in completion order; consumers key rows by `row_index`.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{process_chunk, PreparedRow, ScheduleOutcome, Scheduler, SchedulerContext};
use crate::models::{RowClassification, SchedulerKind};
use nacre_common::{Error, Result};

/// Fixed pool of worker threads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPoolScheduler {
    workers: usize,
    items_per_task: usize,
}

impl WorkerPoolScheduler {
    pub fn new(workers: usize, items_per_task: usize) -> Self {
        Self {
            workers: workers.max(1),
            items_per_task: items_per_task.max(1),
        }
    }

    pub fn items_per_task(&self) -> usize {
        self.items_per_task
    }
}

type TaskQueue = Arc<Mutex<VecDeque<Vec<PreparedRow>>>>;

fn next_task(queue: &TaskQueue) -> Option<Vec<PreparedRow>> {
    match queue.lock() {
        Ok(mut guard) => guard.pop_front(),
        Err(poisoned) => poisoned.into_inner().pop_front(),
    }
}

#[async_trait]
impl Scheduler for WorkerPoolScheduler {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::WorkerPool
    }

    fn workers(&self) -> usize {
        self.workers
    }

    async fn run(&self, rows: Vec<PreparedRow>, ctx: &SchedulerContext) -> Result<ScheduleOutcome> {
        let tasks: VecDeque<Vec<PreparedRow>> =
            rows.chunks(self.items_per_task).map(<[PreparedRow]>::to_vec).collect();
        let task_count = tasks.len();
        info!(
            conversion_id = %ctx.conversion_id,
            rows = rows.len(),
            tasks = task_count,
            workers = self.workers,
            "Starting worker pool"
        );

        let queue: TaskQueue = Arc::new(Mutex::new(tasks));
        let (tx, mut rx) = mpsc::unbounded_channel::<Result<Vec<RowClassification>>>();
        let stop = ctx.cancel.child_token();
        let handle = Handle::current();

        let mut threads = Vec::with_capacity(self.workers);
        for worker_id in 0..self.workers.min(task_count.max(1)) {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let stop = stop.clone();
            let handle = handle.clone();
            let worker_ctx = ctx.clone();

            let thread = std::thread::Builder::new()
                .name(format!("nacre-worker-{}", worker_id))
                .spawn(move || {
                    let mut completed = 0usize;
                    loop {
                        if stop.is_cancelled() {
                            debug!(worker_id, "Worker stopping on cancellation");
                            break;
                        }
                        let Some(task) = next_task(&queue) else {
                            break;
                        };

                        let result = handle.block_on(process_chunk(&worker_ctx, &task));
                        let failed = result.is_err();
                        if let Ok(rows) = &result {
                            worker_ctx.progress.advance(rows.len());
                            completed += 1;
                        }
                        if tx.send(result).is_err() || failed {
                            stop.cancel();
                            break;
                        }
                    }
                    debug!(worker_id, completed, "Worker finished");
                })?;
            threads.push(thread);
        }
        drop(tx);

        let mut persisted = Vec::new();
        let mut first_error: Option<Error> = None;
        while let Some(result) = rx.recv().await {
            match result {
                Ok(rows) => persisted.extend(rows),
                Err(e) => {
                    error!(conversion_id = %ctx.conversion_id, error = %e, "Failed to persist task");
                    first_error.get_or_insert(e);
                }
            }
        }

        // Every sender is gone, so the threads are exiting
        let joined = tokio::task::spawn_blocking(move || {
            threads
                .into_iter()
                .map(|thread| thread.join())
                .filter(|joined| joined.is_err())
                .count()
        })
        .await
        .map_err(|e| Error::Internal(format!("Failed to join workers: {}", e)))?;
        if joined > 0 {
            warn!(conversion_id = %ctx.conversion_id, panicked = joined, "Worker threads panicked");
            first_error.get_or_insert(Error::Internal(format!("{} worker threads panicked", joined)));
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        Ok(ScheduleOutcome {
            rows: persisted,
            cancelled: ctx.cancel.is_cancelled(),
        })
    }
}
