//! Embedding index integration tests
//!
//! Builds the index from a catalog file on disk, reloads the persisted index
//! and drives a conversion with embedding candidates.

mod helpers;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use helpers::fake_providers::LetterEmbedder;
use helpers::{create_test_store, write_catalog_csv};
use nacre_ai::models::{CandidateSource, ConversionParameters, ConversionStatus};
use nacre_ai::orchestrator::ConversionRunner;
use nacre_ai::services::embedding_index::IndexSource;
use nacre_ai::services::{
    CatalogService, ClassificationEngine, EmbeddingIndex, EmbeddingProvider, IndexState, VecRowSource,
};
use nacre_ai::utils::retry::RetryPolicy;

fn index(catalog: Arc<CatalogService>, embedder: Arc<LetterEmbedder>, path: std::path::PathBuf) -> EmbeddingIndex {
    EmbeddingIndex::new(catalog, Some(embedder as Arc<dyn EmbeddingProvider>), "unused", path)
}

#[tokio::test]
async fn test_build_persist_and_reload() {
    let dir = tempfile::TempDir::new().unwrap();
    let catalog_path = write_catalog_csv(dir.path()).unwrap();
    let index_path = dir.path().join("embeddings.json");
    let catalog = Arc::new(CatalogService::load(&catalog_path));
    assert_eq!(catalog.current().len(), 3);

    let embedder = Arc::new(LetterEmbedder::default());
    let built = index(Arc::clone(&catalog), Arc::clone(&embedder), index_path.clone());
    let status = built.build_or_load(false).await;
    assert_eq!(status.state, IndexState::Ready);
    assert_eq!(status.source, Some(IndexSource::Built));
    assert_eq!(status.total, 3);
    assert_eq!(status.done, 3);
    assert_eq!(status.model, "letters-26");
    assert!(index_path.exists());

    // Querying with an entry's own embedding text scores ~1
    let entry = catalog.current().get("AB.01").cloned().unwrap();
    let hits = built.retrieve(&entry.embedding_text(), 1).await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entry.code, "AB.01");
    assert!((hits[0].score - 1.0).abs() < 1e-5);

    // A second instance adopts the persisted file without calling the provider
    let reloaded_embedder = Arc::new(LetterEmbedder::default());
    let reloaded = index(Arc::clone(&catalog), Arc::clone(&reloaded_embedder), index_path.clone());
    let status = reloaded.build_or_load(false).await;
    assert_eq!(status.state, IndexState::Ready);
    assert_eq!(status.source, Some(IndexSource::Loaded));
    assert_eq!(reloaded_embedder.calls(), 0);

    let status = reloaded.build_or_load(true).await;
    assert_eq!(status.source, Some(IndexSource::Built));
    assert!(reloaded_embedder.calls() > 0);
}

#[tokio::test]
async fn test_status_without_index_file_stays_unbuilt() {
    let dir = tempfile::TempDir::new().unwrap();
    let catalog_path = write_catalog_csv(dir.path()).unwrap();
    let catalog = Arc::new(CatalogService::load(&catalog_path));
    let embedder = Arc::new(LetterEmbedder::default());

    let idx = index(catalog, Arc::clone(&embedder), dir.path().join("embeddings.json"));
    let status = idx.load_existing().await;

    assert_ne!(status.state, IndexState::Ready);
    assert_eq!(embedder.calls(), 0);
    assert!(idx.retrieve("papier", 3).await.is_empty());
}

#[tokio::test]
async fn test_conversion_with_embedding_candidates() {
    let (dir, _pool, store) = create_test_store().await.unwrap();
    let catalog_path = write_catalog_csv(dir.path()).unwrap();
    let catalog = Arc::new(CatalogService::load(&catalog_path));
    let embedder = Arc::new(LetterEmbedder::default());
    let idx = Arc::new(index(Arc::clone(&catalog), embedder, dir.path().join("embeddings.json")));
    assert_eq!(idx.build_or_load(false).await.state, IndexState::Ready);

    let engine = Arc::new(ClassificationEngine::new(None, None, RetryPolicy::no_retry()));
    let runner = ConversionRunner::new(Arc::clone(&store), engine, catalog).with_embeddings(idx);

    let source = VecRowSource::from_labels("libelle", &["Livraison colis express", "Repas traiteur"]);
    let mut params = ConversionParameters::new("libelle");
    params.candidate_source = CandidateSource::Embedding;
    params.max_candidates = 2;

    let conversion = runner
        .start("upload", &source, &params, None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(conversion.status, ConversionStatus::Completed);
    assert_eq!(conversion.rows[0].result.chosen_code, "TR.02");
    assert_eq!(conversion.rows[1].result.chosen_code, "RE.03");
}
