//! Error types for nacre-ai
//!
//! Provider failures never leave the classification engine: they are retried
//! when transient and otherwise resolved by the heuristic scorer. This type
//! exists so that decision can be made on something richer than a string.

use thiserror::Error;

/// Completion/embedding provider errors
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Connection refused, reset, DNS failure
    #[error("Network error: {0}")]
    Network(String),

    /// Connect or total timeout exceeded
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Non-2xx response
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    /// HTTP 429
    #[error("Rate limited by provider")]
    RateLimited,

    /// Response body not in the expected shape
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Batch response with a different number of items than requested
    #[error("Expected {expected} results, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    /// No API key configured
    #[error("Provider not configured")]
    NotConfigured,
}

impl ProviderError {
    /// Whether retrying the same call can succeed (network, timeout, 429, 5xx)
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Network(_) | ProviderError::Timeout(_) | ProviderError::RateLimited => {
                true
            }
            ProviderError::Api { status, .. } => *status >= 500,
            ProviderError::Malformed(_)
            | ProviderError::CountMismatch { .. }
            | ProviderError::NotConfigured => false,
        }
    }

    /// Whether the provider is unreachable rather than misbehaving
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            ProviderError::Network(_)
                | ProviderError::Timeout(_)
                | ProviderError::RateLimited
                | ProviderError::NotConfigured
                | ProviderError::Api { .. }
        )
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(err.to_string())
        } else if err.is_decode() {
            ProviderError::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            ProviderError::Api {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Malformed(err.to_string())
    }
}
