//! nacre-ai library interface
//!
//! Row classification pipeline: catalog and embedding retrieval, the
//! provider-backed classification engine with heuristic fallback, pattern
//! learning, and the schedulers that run conversions over thousands of rows.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;

pub use crate::error::ProviderError;

use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ClassifierSettings;
use crate::db::{ConversionStore, SqliteConversionStore};
use crate::orchestrator::ConversionRunner;
use crate::services::{
    CatalogService, ClassificationEngine, CompletionProvider, EmbeddingIndex, EmbeddingProvider,
    OpenAiClient, PatternStore,
};
use nacre_common::config::RootFolderInitializer;
use nacre_common::events::EventBus;

/// Services shared by every conversion of the process
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Lifecycle and progress events
    pub event_bus: EventBus,
    pub settings: Arc<ClassifierSettings>,
    pub catalog: Arc<CatalogService>,
    pub embeddings: Arc<EmbeddingIndex>,
    pub engine: Arc<ClassificationEngine>,
    pub store: Arc<dyn ConversionStore>,
    /// Cancellation tokens of running conversions
    pub cancellation_tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    /// Service startup timestamp
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Open the database and build the services
    ///
    /// The provider is enabled only when an API key was resolved; without
    /// one the engine runs heuristic-only and the embedding index reports
    /// `unavailable`.
    pub async fn initialize(initializer: &RootFolderInitializer, settings: ClassifierSettings) -> anyhow::Result<Self> {
        initializer
            .ensure_directory_exists()
            .context("Failed to initialize root folder")?;

        let db = db::init_database_pool(&initializer.database_path()).await?;

        let client = if settings.provider_enabled() {
            Some(Arc::new(
                OpenAiClient::from_settings(&settings).context("Failed to build provider client")?,
            ))
        } else {
            tracing::warn!("No provider API key configured, classification runs heuristic-only");
            None
        };

        let event_bus = EventBus::new(100);
        let catalog = Arc::new(CatalogService::load(settings.catalog_path.clone()));
        let embeddings = Arc::new(
            EmbeddingIndex::new(
                Arc::clone(&catalog),
                client.clone().map(|c| c as Arc<dyn EmbeddingProvider>),
                settings.embeddings_model.clone(),
                initializer.embedding_index_path(),
            )
            .with_batch_size(settings.embedding_batch_size)
            .with_cache_size(settings.embedding_cache_size)
            .with_event_bus(event_bus.clone()),
        );
        let engine = Arc::new(ClassificationEngine::new(
            client.map(|c| c as Arc<dyn CompletionProvider>),
            Some(PatternStore::new(db.clone())),
            settings.retry_policy(),
        ));
        let store: Arc<dyn ConversionStore> = Arc::new(SqliteConversionStore::new(db.clone()));

        Ok(Self {
            db,
            event_bus,
            settings: Arc::new(settings),
            catalog,
            embeddings,
            engine,
            store,
            cancellation_tokens: Arc::new(RwLock::new(HashMap::new())),
            startup_time: Utc::now(),
        })
    }

    /// Runner wired to this state's services
    pub fn runner(&self) -> ConversionRunner {
        ConversionRunner::new(
            Arc::clone(&self.store),
            Arc::clone(&self.engine),
            Arc::clone(&self.catalog),
        )
        .with_embeddings(Arc::clone(&self.embeddings))
        .with_event_bus(self.event_bus.clone())
    }

    /// Register a cancellation token for a running conversion
    pub async fn register_cancellation(&self, conversion_id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        self.cancellation_tokens
            .write()
            .await
            .insert(conversion_id, token.clone());
        token
    }

    /// Cancel a running conversion; `false` when it is unknown
    pub async fn cancel(&self, conversion_id: Uuid) -> bool {
        match self.cancellation_tokens.write().await.remove(&conversion_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}
