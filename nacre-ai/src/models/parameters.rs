//! Conversion job parameters
//!
//! Selects the label/context columns, the candidate source and the scheduling
//! strategy for one conversion.

use nacre_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Where candidates for a row come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CandidateSource {
    /// Token-set fuzzy match on the catalog (default)
    #[default]
    Fuzzy,
    /// Embedding nearest neighbours, fuzzy when the index is not ready
    Embedding,
    /// Plain token overlap
    Lexical,
}

/// Scheduling strategy for a conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    /// Batches on async tasks bounded by a semaphore; output in submission order
    #[default]
    Bounded,
    /// Fixed pool of worker threads each processing whole tasks; output keyed by row index
    WorkerPool,
}

impl SchedulerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerKind::Bounded => "bounded",
            SchedulerKind::WorkerPool => "worker_pool",
        }
    }
}

/// Worker pool sizing for a speed preset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPoolPreset {
    pub workers: usize,
    pub items_per_task: usize,
}

/// Speed presets accepted by `speed`
pub const SUPPORTED_SPEEDS: [u8; 3] = [1, 2, 4];

/// Worker pool preset for a speed value (1 → 2×3, 2 → 4×4, 4 → 6×6)
pub fn worker_pool_preset(speed: u8) -> WorkerPoolPreset {
    match speed {
        4 => WorkerPoolPreset {
            workers: 6,
            items_per_task: 6,
        },
        2 => WorkerPoolPreset {
            workers: 4,
            items_per_task: 4,
        },
        _ => WorkerPoolPreset {
            workers: 2,
            items_per_task: 3,
        },
    }
}

/// Concurrent batches for the bounded pipeline (≤8 → 3, ≤15 → 5, else 8)
pub fn bounded_max_concurrent(batch_size: usize) -> usize {
    match batch_size {
        0..=8 => 3,
        9..=15 => 5,
        _ => 8,
    }
}

fn default_batch_size() -> usize {
    10
}

fn default_speed() -> u8 {
    1
}

fn default_max_candidates() -> usize {
    25
}

/// Parameters of one conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionParameters {
    /// Column holding the free-text label
    pub label_column: String,
    /// Columns copied into each row's context (supplier, account, amount...)
    #[serde(default)]
    pub context_columns: Vec<String>,
    /// Stop after this many source rows (skipped rows included)
    #[serde(default)]
    pub max_rows: Option<usize>,
    /// Rows per provider call in the bounded pipeline
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Throughput preset (1, 2 or 4)
    #[serde(default = "default_speed")]
    pub speed: u8,
    #[serde(default)]
    pub scheduler: SchedulerKind,
    #[serde(default)]
    pub candidate_source: CandidateSource,
    /// Candidates retrieved per row before prompt truncation
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
}

impl ConversionParameters {
    pub fn new(label_column: impl Into<String>) -> Self {
        Self {
            label_column: label_column.into(),
            context_columns: Vec::new(),
            max_rows: None,
            batch_size: default_batch_size(),
            speed: default_speed(),
            scheduler: SchedulerKind::default(),
            candidate_source: CandidateSource::default(),
            max_candidates: default_max_candidates(),
        }
    }

    /// Reject parameters no scheduler can run
    pub fn validate(&self) -> Result<()> {
        if self.label_column.trim().is_empty() {
            return Err(Error::InvalidInput("label_column must not be empty".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidInput("batch_size must be at least 1".to_string()));
        }
        if self.max_candidates == 0 {
            return Err(Error::InvalidInput("max_candidates must be at least 1".to_string()));
        }
        if !SUPPORTED_SPEEDS.contains(&self.speed) {
            return Err(Error::InvalidInput(format!(
                "speed must be one of {:?}, got {}",
                SUPPORTED_SPEEDS, self.speed
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_pool_presets() {
        assert_eq!(worker_pool_preset(1), WorkerPoolPreset { workers: 2, items_per_task: 3 });
        assert_eq!(worker_pool_preset(2), WorkerPoolPreset { workers: 4, items_per_task: 4 });
        assert_eq!(worker_pool_preset(4), WorkerPoolPreset { workers: 6, items_per_task: 6 });
    }

    #[test]
    fn test_bounded_concurrency_from_batch_size() {
        assert_eq!(bounded_max_concurrent(5), 3);
        assert_eq!(bounded_max_concurrent(8), 3);
        assert_eq!(bounded_max_concurrent(10), 5);
        assert_eq!(bounded_max_concurrent(15), 5);
        assert_eq!(bounded_max_concurrent(16), 8);
    }

    #[test]
    fn test_validate() {
        assert!(ConversionParameters::new("libelle").validate().is_ok());
        assert!(ConversionParameters::new(" ").validate().is_err());

        let mut params = ConversionParameters::new("libelle");
        params.speed = 3;
        assert!(matches!(params.validate(), Err(Error::InvalidInput(_))));

        params.speed = 4;
        params.batch_size = 0;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let params: ConversionParameters =
            serde_json::from_str(r#"{"label_column":"libelle","scheduler":"worker_pool"}"#).unwrap();
        assert_eq!(params.batch_size, 10);
        assert_eq!(params.speed, 1);
        assert_eq!(params.scheduler, SchedulerKind::WorkerPool);
        assert_eq!(params.candidate_source, CandidateSource::Fuzzy);
        assert_eq!(params.max_candidates, 25);
    }
}
