//! Data models for nacre-ai

pub mod catalog_entry;
pub mod classification;
pub mod conversion;
pub mod parameters;

pub use catalog_entry::{normalize_code, CatalogEntry};
pub use classification::{
    Alternative, ClassificationOutcome, ClassificationRequest, ClassificationResult,
    RowClassification, RowContext, MAX_ALTERNATIVES, UNCLASSIFIABLE_CODE,
};
pub use conversion::{Conversion, ConversionPatch, ConversionStats, ConversionStatus};
pub use parameters::{
    bounded_max_concurrent, worker_pool_preset, CandidateSource, ConversionParameters,
    SchedulerKind, WorkerPoolPreset,
};
