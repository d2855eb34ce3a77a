//! Configuration resolution for nacre-ai
//!
//! Classifier settings resolve with ENV → TOML → compiled default priority.
//! A missing API key is not an error: the engine then runs heuristic-only.

use nacre_common::config::TomlConfig;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::utils::RetryPolicy;

/// Environment variables consulted for the provider API key, in priority order
pub const API_KEY_ENV_VARS: [&str; 2] = ["NACRE_OPENAI_API_KEY", "OPENAI_API_KEY"];

/// File name of the catalog inside the data directory when none is configured
pub const DEFAULT_CATALOG_FILE: &str = "nacre_dictionary.csv";

/// Resolved classifier configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierSettings {
    /// Completion model
    pub model: String,
    /// Embedding model; part of the embedding index staleness check
    pub embeddings_model: String,
    /// OpenAI-compatible API root
    pub api_base_url: String,
    /// Provider API key; `None` means heuristic-only mode
    pub api_key: Option<String>,
    /// Delimited catalog file
    pub catalog_path: PathBuf,
    /// Candidates retrieved per row
    pub max_candidates: usize,
    /// Rows per provider call in the bounded pipeline
    pub batch_size: usize,
    /// Provider request budget shared by all calls of the process
    pub requests_per_minute: u32,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Attempts per provider call, first one included
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    /// Texts per embedding request
    pub embedding_batch_size: usize,
    /// Entries kept by the in-process embedding cache
    pub embedding_cache_size: usize,
}

impl ClassifierSettings {
    /// Compiled defaults, catalog expected in `data_dir`
    pub fn defaults(data_dir: &Path) -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            embeddings_model: "text-embedding-3-large".to_string(),
            api_base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            catalog_path: data_dir.join(DEFAULT_CATALOG_FILE),
            max_candidates: 25,
            batch_size: 10,
            requests_per_minute: 500,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(2),
            embedding_batch_size: 64,
            embedding_cache_size: 1000,
        }
    }

    /// Resolve settings: environment overrides TOML, TOML overrides defaults
    pub fn resolve(toml_config: &TomlConfig, data_dir: &Path) -> Self {
        let mut settings = Self::defaults(data_dir);
        let classifier = &toml_config.classifier;

        if let Some(model) = &classifier.model {
            settings.model = model.clone();
        }
        if let Some(model) = &classifier.embeddings_model {
            settings.embeddings_model = model.clone();
        }
        if let Some(url) = &classifier.api_base_url {
            settings.api_base_url = url.clone();
        }
        if let Some(path) = &classifier.catalog_path {
            settings.catalog_path = path.clone();
        }
        if let Some(n) = classifier.max_candidates {
            settings.max_candidates = n;
        }
        if let Some(n) = classifier.batch_size {
            settings.batch_size = n;
        }
        if let Some(n) = classifier.requests_per_minute {
            settings.requests_per_minute = n;
        }
        if let Some(secs) = classifier.connect_timeout_secs {
            settings.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = classifier.request_timeout_secs {
            settings.request_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = classifier.max_attempts {
            settings.max_attempts = n;
        }
        if let Some(ms) = classifier.retry_base_delay_ms {
            settings.retry_base_delay = Duration::from_millis(ms);
        }

        if let Some(model) = env_value::<String>("NACRE_OPENAI_MODEL") {
            settings.model = model;
        }
        if let Some(model) = env_value::<String>("NACRE_EMBEDDINGS_MODEL") {
            settings.embeddings_model = model;
        }
        if let Some(n) = env_value::<usize>("NACRE_MAX_CANDIDATES") {
            settings.max_candidates = n;
        }
        if let Some(n) = env_value::<usize>("NACRE_BATCH_SIZE") {
            settings.batch_size = n;
        }
        if let Some(path) = env_value::<PathBuf>("NACRE_CATALOG_PATH") {
            settings.catalog_path = path;
        }

        settings.max_candidates = settings.max_candidates.max(1);
        settings.batch_size = settings.batch_size.max(1);
        settings.requests_per_minute = settings.requests_per_minute.max(1);
        settings.api_key = resolve_openai_api_key(toml_config);
        settings
    }

    /// Whether a provider key is available
    pub fn provider_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Retry policy for provider calls
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: self.retry_base_delay,
            max_delay: self.retry_base_delay.saturating_mul(8),
        }
    }
}

/// Parse an environment variable, ignoring blank or unparseable values
fn env_value<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    if raw.trim().is_empty() {
        return None;
    }
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring unparseable {}={:?}", name, raw);
            None
        }
    }
}

/// Resolve the provider API key
///
/// **Priority:** ENV (`NACRE_OPENAI_API_KEY`, then `OPENAI_API_KEY`) → TOML
pub fn resolve_openai_api_key(toml_config: &TomlConfig) -> Option<String> {
    let env_key = API_KEY_ENV_VARS.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .filter(|key| is_valid_key(key))
            .map(|key| (*name, key))
    });
    let toml_key = toml_config
        .openai_api_key
        .as_ref()
        .filter(|key| is_valid_key(key));

    if env_key.is_some() && toml_key.is_some() {
        warn!("API key found in both environment and TOML. Using environment (highest priority).");
    }

    if let Some((name, key)) = env_key {
        info!("API key loaded from environment variable {}", name);
        return Some(key.trim().to_string());
    }

    if let Some(key) = toml_key {
        info!("API key loaded from TOML config");
        return Some(key.trim().to_string());
    }

    info!("No API key configured, classification runs in heuristic-only mode");
    None
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
