//! Embedding index over the catalog
//!
//! One vector per catalog entry (category followed by keywords), built through
//! the embedding provider and persisted as JSON next to its build metadata.
//! A persisted index is reused until the catalog file's mtime or the
//! embedding model changes.
//!
//! **State machine:** `Unbuilt → Building → Ready | Unavailable | Failed`.
//! Only `Ready` answers [`EmbeddingIndex::retrieve`] with results; callers fall
//! back to fuzzy retrieval otherwise.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};

use crate::error::ProviderError;
use crate::models::CatalogEntry;
use crate::services::catalog::CatalogService;
use crate::services::openai_client::EmbeddingProvider;
use nacre_common::events::{EventBus, NacreEvent};

/// Default number of texts per provider call
pub const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 64;
/// Default capacity of the query/entry embedding cache
pub const DEFAULT_EMBEDDING_CACHE_SIZE: usize = 1000;

/// Index lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    Unbuilt,
    Building,
    Ready,
    Unavailable,
    Failed,
}

impl IndexState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexState::Unbuilt => "unbuilt",
            IndexState::Building => "building",
            IndexState::Ready => "ready",
            IndexState::Unavailable => "unavailable",
            IndexState::Failed => "failed",
        }
    }
}

/// Where the current vectors came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexSource {
    Loaded,
    Built,
    Building,
    Unavailable,
    Failed,
}

/// One indexed catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub code: String,
    pub category: String,
    pub keywords: Vec<String>,
    pub vector: Vec<f32>,
}

impl EmbeddingRecord {
    fn to_entry(&self) -> CatalogEntry {
        CatalogEntry::new(&self.code, &self.category, self.keywords.clone())
    }
}

/// On-disk layout
#[derive(Debug, Serialize, Deserialize)]
struct PersistedIndex {
    built_at: DateTime<Utc>,
    model: String,
    catalog_mtime: Option<f64>,
    #[serde(default)]
    catalog_path: Option<String>,
    items: Vec<EmbeddingRecord>,
}

/// Snapshot reported by [`EmbeddingIndex::status`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStatus {
    pub state: IndexState,
    pub total: usize,
    pub done: usize,
    pub model: String,
    pub last_built_at: Option<DateTime<Utc>>,
    pub catalog_path: Option<String>,
    pub catalog_mtime: Option<f64>,
    pub source: Option<IndexSource>,
}

/// Catalog entry with its cosine similarity to the query
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub entry: CatalogEntry,
    pub score: f32,
}

/// Cosine similarity; 0 for empty, mismatched or zero-norm vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Bounded content-hash cache, oldest insertion evicted first
struct EmbeddingCache {
    capacity: usize,
    vectors: HashMap<String, Vec<f32>>,
    order: VecDeque<String>,
}

impl EmbeddingCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            vectors: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn key(model: &str, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update(b":");
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn get(&self, key: &str) -> Option<Vec<f32>> {
        self.vectors.get(key).cloned()
    }

    fn insert(&mut self, key: String, vector: Vec<f32>) {
        if self.capacity == 0 || self.vectors.contains_key(&key) {
            return;
        }
        while self.vectors.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.vectors.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(key.clone());
        self.vectors.insert(key, vector);
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }
}

struct IndexInner {
    status: IndexStatus,
    records: Arc<Vec<EmbeddingRecord>>,
}

/// Vector index over the catalog
pub struct EmbeddingIndex {
    catalog: Arc<CatalogService>,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    model: String,
    index_path: PathBuf,
    batch_size: usize,
    cache: Mutex<EmbeddingCache>,
    inner: RwLock<IndexInner>,
    /// Serialises builds
    build_lock: tokio::sync::Mutex<()>,
    event_bus: Option<EventBus>,
}

impl EmbeddingIndex {
    /// Create an unbuilt index
    ///
    /// `model` is only used for status reporting when `provider` is `None`;
    /// otherwise the provider's model identifier wins.
    pub fn new(
        catalog: Arc<CatalogService>,
        provider: Option<Arc<dyn EmbeddingProvider>>,
        model: impl Into<String>,
        index_path: impl Into<PathBuf>,
    ) -> Self {
        let model = provider
            .as_ref()
            .map(|p| p.model().to_string())
            .unwrap_or_else(|| model.into());

        Self {
            catalog,
            provider,
            model: model.clone(),
            index_path: index_path.into(),
            batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
            cache: Mutex::new(EmbeddingCache::new(DEFAULT_EMBEDDING_CACHE_SIZE)),
            inner: RwLock::new(IndexInner {
                status: IndexStatus {
                    state: IndexState::Unbuilt,
                    total: 0,
                    done: 0,
                    model,
                    last_built_at: None,
                    catalog_path: None,
                    catalog_mtime: None,
                    source: None,
                },
                records: Arc::new(Vec::new()),
            }),
            build_lock: tokio::sync::Mutex::new(()),
            event_bus: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_cache_size(self, capacity: usize) -> Self {
        Self {
            cache: Mutex::new(EmbeddingCache::new(capacity)),
            ..self
        }
    }

    /// Publish `EmbeddingIndexStatusChanged` on state transitions
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Current state and build metadata
    pub fn status(&self) -> IndexStatus {
        match self.inner.read() {
            Ok(inner) => inner.status.clone(),
            Err(poisoned) => poisoned.into_inner().status.clone(),
        }
    }

    pub fn state(&self) -> IndexState {
        self.status().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == IndexState::Ready
    }

    fn update_inner(&self, update: impl FnOnce(&mut IndexInner)) -> IndexStatus {
        let mut inner = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        update(&mut inner);
        inner.status.clone()
    }

    fn set_state(&self, state: IndexState, source: IndexSource) {
        let status = self.update_inner(|inner| {
            inner.status.state = state;
            inner.status.source = Some(source);
            if state != IndexState::Ready {
                inner.records = Arc::new(Vec::new());
            }
        });
        self.publish(&status);
    }

    fn publish(&self, status: &IndexStatus) {
        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(NacreEvent::EmbeddingIndexStatusChanged {
                state: status.state.as_str().to_string(),
                total: status.total,
                done: status.done,
                timestamp: Utc::now(),
            });
        }
    }

    /// Load the persisted index when fresh, otherwise rebuild it
    ///
    /// Never fails: an unreachable provider leaves the index `Unavailable`,
    /// any other problem leaves it `Failed`. The resulting status is returned.
    pub async fn build_or_load(&self, force: bool) -> IndexStatus {
        let _guard = self.build_lock.lock().await;

        if self.provider.is_none() {
            info!("No embedding provider configured, embedding index unavailable");
            self.set_state(IndexState::Unavailable, IndexSource::Unavailable);
            return self.status();
        }

        let catalog = self.catalog.current();
        let catalog_path = self.catalog_file();
        let catalog_mtime = file_mtime(&catalog_path);

        if !force {
            if let Some(status) = self.adopt_persisted(catalog_mtime).await {
                return status;
            }
        }

        self.build(catalog.entries(), &catalog_path, catalog_mtime).await
    }

    /// Load the persisted index if it is fresh, without calling the provider
    ///
    /// Leaves the state untouched when there is nothing usable on disk.
    pub async fn load_existing(&self) -> IndexStatus {
        let _guard = self.build_lock.lock().await;
        if self.state() != IndexState::Ready {
            let catalog_mtime = file_mtime(&self.catalog_file());
            self.adopt_persisted(catalog_mtime).await;
        }
        self.status()
    }

    fn catalog_file(&self) -> PathBuf {
        self.catalog
            .current()
            .source()
            .unwrap_or_else(|| self.catalog.path())
            .to_path_buf()
    }

    async fn adopt_persisted(&self, catalog_mtime: Option<f64>) -> Option<IndexStatus> {
        let persisted = self.load_persisted(catalog_mtime).await?;
        let status = self.update_inner(|inner| {
            inner.status = IndexStatus {
                state: IndexState::Ready,
                total: persisted.items.len(),
                done: persisted.items.len(),
                model: persisted.model.clone(),
                last_built_at: Some(persisted.built_at),
                catalog_path: persisted.catalog_path.clone(),
                catalog_mtime: persisted.catalog_mtime,
                source: Some(IndexSource::Loaded),
            };
            inner.records = Arc::new(persisted.items);
        });
        info!(
            path = %self.index_path.display(),
            items = status.total,
            "Embedding index loaded"
        );
        self.publish(&status);
        Some(status)
    }

    async fn load_persisted(&self, catalog_mtime: Option<f64>) -> Option<PersistedIndex> {
        let bytes = match tokio::fs::read(&self.index_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(path = %self.index_path.display(), error = %e, "No persisted embedding index");
                return None;
            }
        };

        let persisted: PersistedIndex = match serde_json::from_slice(&bytes) {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!(path = %self.index_path.display(), error = %e, "Persisted embedding index unreadable, rebuilding");
                return None;
            }
        };

        if persisted.model != self.model || persisted.catalog_mtime != catalog_mtime || persisted.items.is_empty() {
            info!(
                stored_model = %persisted.model,
                model = %self.model,
                "Persisted embedding index is stale, rebuilding"
            );
            return None;
        }

        Some(persisted)
    }

    async fn build(&self, entries: &[CatalogEntry], catalog_path: &Path, catalog_mtime: Option<f64>) -> IndexStatus {
        if entries.is_empty() {
            warn!("Catalog is empty, embedding index not built");
            self.update_inner(|inner| inner.status.total = 0);
            self.set_state(IndexState::Failed, IndexSource::Failed);
            return self.status();
        }

        let catalog_path_text = catalog_path.display().to_string();
        let status = self.update_inner(|inner| {
            inner.status = IndexStatus {
                state: IndexState::Building,
                total: entries.len(),
                done: 0,
                model: self.model.clone(),
                last_built_at: inner.status.last_built_at,
                catalog_path: Some(catalog_path_text.clone()),
                catalog_mtime,
                source: Some(IndexSource::Building),
            };
            inner.records = Arc::new(Vec::new());
        });
        self.publish(&status);
        info!(entries = entries.len(), model = %self.model, "Building embedding index");

        let mut records = Vec::with_capacity(entries.len());
        for chunk in entries.chunks(self.batch_size) {
            let texts: Vec<String> = chunk.iter().map(CatalogEntry::embedding_text).collect();
            let vectors = match self.embed_texts(&texts).await {
                Ok(vectors) => vectors,
                Err(e) => {
                    let (state, source) = if e.is_unavailable() {
                        (IndexState::Unavailable, IndexSource::Unavailable)
                    } else {
                        (IndexState::Failed, IndexSource::Failed)
                    };
                    warn!(error = %e, state = state.as_str(), "Embedding index build aborted");
                    self.set_state(state, source);
                    return self.status();
                }
            };

            records.extend(chunk.iter().zip(vectors).map(|(entry, vector)| EmbeddingRecord {
                code: entry.code.clone(),
                category: entry.category.clone(),
                keywords: entry.keywords.clone(),
                vector,
            }));
            let done = records.len();
            self.update_inner(|inner| inner.status.done = done);
            debug!(done, total = entries.len(), "Embedding batch complete");
        }

        let persisted = PersistedIndex {
            built_at: Utc::now(),
            model: self.model.clone(),
            catalog_mtime,
            catalog_path: Some(catalog_path_text),
            items: records,
        };
        if let Err(e) = self.persist(&persisted).await {
            warn!(path = %self.index_path.display(), error = %e, "Failed to persist embedding index, keeping it in memory");
        }

        let status = self.update_inner(|inner| {
            inner.status.state = IndexState::Ready;
            inner.status.source = Some(IndexSource::Built);
            inner.status.last_built_at = Some(persisted.built_at);
            inner.status.done = persisted.items.len();
            inner.records = Arc::new(persisted.items);
        });
        info!(items = status.total, "Embedding index built");
        self.publish(&status);
        status
    }

    async fn persist(&self, persisted: &PersistedIndex) -> nacre_common::Result<()> {
        if let Some(parent) = self.index_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec(persisted)?;
        tokio::fs::write(&self.index_path, json).await?;
        Ok(())
    }

    /// Embed `texts`, serving repeats from the cache
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let provider = self.provider.as_ref().ok_or(ProviderError::NotConfigured)?;

        let keys: Vec<String> = texts.iter().map(|t| EmbeddingCache::key(&self.model, t)).collect();
        let mut vectors: Vec<Option<Vec<f32>>> = {
            let cache = self.lock_cache();
            keys.iter().map(|k| cache.get(k)).collect()
        };

        let missing: Vec<usize> = (0..texts.len()).filter(|&i| vectors[i].is_none()).collect();
        if !missing.is_empty() {
            let batch: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let fetched = provider.embed(&batch).await?;
            if fetched.len() != batch.len() {
                return Err(ProviderError::CountMismatch {
                    expected: batch.len(),
                    actual: fetched.len(),
                });
            }

            let mut cache = self.lock_cache();
            for (i, vector) in missing.into_iter().zip(fetched) {
                cache.insert(keys[i].clone(), vector.clone());
                vectors[i] = Some(vector);
            }
        }

        Ok(vectors.into_iter().map(Option::unwrap_or_default).collect())
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, EmbeddingCache> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Number of cached vectors
    pub fn cached_vectors(&self) -> usize {
        self.lock_cache().len()
    }

    /// Nearest catalog entries to `query`, best first
    ///
    /// Empty unless the index is `Ready`; a failing query embedding also
    /// yields an empty result.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Vec<ScoredEntry> {
        let records = match self.inner.read() {
            Ok(inner) if inner.status.state == IndexState::Ready => Arc::clone(&inner.records),
            Ok(_) => return Vec::new(),
            Err(poisoned) => {
                let inner = poisoned.into_inner();
                if inner.status.state != IndexState::Ready {
                    return Vec::new();
                }
                Arc::clone(&inner.records)
            }
        };
        if top_k == 0 || records.is_empty() || query.trim().is_empty() {
            return Vec::new();
        }

        let query_vector = match self.embed_texts(&[query.to_string()]).await {
            Ok(mut vectors) => vectors.pop().unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Query embedding failed, no embedding candidates");
                return Vec::new();
            }
        };

        let mut scored: Vec<(usize, f32)> = records
            .iter()
            .enumerate()
            .map(|(i, record)| (i, cosine_similarity(&query_vector, &record.vector)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .take(top_k)
            .map(|(i, score)| ScoredEntry {
                entry: records[i].to_entry(),
                score,
            })
            .collect()
    }
}

/// Modification time in seconds since the epoch
fn file_mtime(path: &Path) -> Option<f64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(modified.duration_since(UNIX_EPOCH).ok()?.as_secs_f64())
}
