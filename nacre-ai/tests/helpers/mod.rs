//! Shared test helpers for nacre-ai integration tests
//!
//! Each test binary pulls in only what it uses.

#![allow(dead_code)]

pub mod db_utils;
pub mod fake_providers;
pub mod fixtures;

pub use db_utils::{create_test_db, create_test_store};
pub use fake_providers::{BrokenBatchProvider, FirstCandidateProvider, LetterEmbedder, TimeoutProvider};
pub use fixtures::{sample_catalog, sample_catalog_service, write_catalog_csv};
