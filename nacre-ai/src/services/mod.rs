//! Service modules for the row classification pipeline
//!
//! Leaves first: catalog and embedding index produce candidates, the pattern
//! store learns from classified rows, the classification engine picks codes.

pub mod candidate_retriever;
pub mod catalog;
pub mod classifier;
pub mod embedding_index;
pub mod openai_client;
pub mod pattern_store;
pub mod row_source;

pub use candidate_retriever::CandidateRetriever;
pub use catalog::{Catalog, CatalogService};
pub use classifier::ClassificationEngine;
pub use embedding_index::{EmbeddingIndex, IndexState, IndexStatus};
pub use openai_client::{CompletionProvider, CompletionRequest, EmbeddingProvider, OpenAiClient};
pub use pattern_store::PatternStore;
pub use row_source::{CsvRowSource, RowSource, VecRowSource};
