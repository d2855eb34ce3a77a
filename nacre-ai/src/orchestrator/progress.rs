//! Progress accounting shared by the schedulers
//!
//! Tasks finish in any order, on any thread. The counter and the callback
//! invocation happen under one lock, so callers observe `items_processed`
//! non-decreasing.

use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Snapshot passed to the progress callback
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpdate {
    pub items_processed: usize,
    pub total_items: usize,
    pub elapsed_seconds: f64,
}

impl ProgressUpdate {
    /// Completion percentage (100.0 when there is nothing to do)
    pub fn percentage(&self) -> f64 {
        if self.total_items == 0 {
            return 100.0;
        }
        (self.items_processed as f64 / self.total_items as f64 * 100.0).min(100.0)
    }

    /// Items per second since the start
    pub fn rate(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.items_processed as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }
}

/// Progress callback; must not block
pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Shared progress counter
#[derive(Clone)]
pub struct ProgressReporter {
    total: usize,
    start: Instant,
    processed: Arc<Mutex<usize>>,
    callback: Option<ProgressCallback>,
}

impl ProgressReporter {
    pub fn new(total: usize, callback: Option<ProgressCallback>) -> Self {
        Self {
            total,
            start: Instant::now(),
            processed: Arc::new(Mutex::new(0)),
            callback,
        }
    }

    /// Reporter without a callback
    pub fn silent(total: usize) -> Self {
        Self::new(total, None)
    }

    /// Count `items` more and notify the callback
    pub fn advance(&self, items: usize) -> ProgressUpdate {
        let mut processed = match self.processed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *processed += items;

        let update = ProgressUpdate {
            items_processed: *processed,
            total_items: self.total,
            elapsed_seconds: self.start.elapsed().as_secs_f64(),
        };
        if let Some(callback) = &self.callback {
            callback(update);
        }
        update
    }

    pub fn processed(&self) -> usize {
        match self.processed.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_math() {
        let update = ProgressUpdate {
            items_processed: 25,
            total_items: 100,
            elapsed_seconds: 5.0,
        };
        assert_eq!(update.percentage(), 25.0);
        assert_eq!(update.rate(), 5.0);

        let empty = ProgressUpdate {
            items_processed: 0,
            total_items: 0,
            elapsed_seconds: 0.0,
        };
        assert_eq!(empty.percentage(), 100.0);
        assert_eq!(empty.rate(), 0.0);
    }

    #[test]
    fn test_concurrent_advances_are_monotonic() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reporter = ProgressReporter::new(
            400,
            Some(Arc::new(move |update: ProgressUpdate| {
                sink.lock().unwrap().push(update.items_processed);
            })),
        );

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let reporter = reporter.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        reporter.advance(1);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 400);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(reporter.processed(), 400);
    }
}
