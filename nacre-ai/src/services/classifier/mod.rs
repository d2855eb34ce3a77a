//! Classification engine
//!
//! Picks one catalog code per label, through the completion provider when one
//! is configured and through the local keyword scorer otherwise. Provider
//! failures are retried when transient and then resolved by the heuristic, so
//! [`ClassificationEngine::classify`] and [`ClassificationEngine::classify_batch`]
//! never fail.
//!
//! Batch calls are all-or-nothing: a batch answer that cannot be parsed or has
//! the wrong number of items sends every item of the batch to the heuristic.

pub mod heuristic;
pub mod prompt;
pub mod sanitize;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ProviderError;
use crate::models::{ClassificationOutcome, ClassificationRequest, ClassificationResult};
use crate::services::openai_client::CompletionProvider;
use crate::services::pattern_store::PatternStore;
use crate::utils::retry::{retry_with_backoff, RetryPolicy};

pub use heuristic::classify_heuristic;
pub use sanitize::sanitize;

/// Provider-backed classifier with heuristic fallback
#[derive(Clone)]
pub struct ClassificationEngine {
    provider: Option<Arc<dyn CompletionProvider>>,
    patterns: Option<PatternStore>,
    retry: RetryPolicy,
}

impl ClassificationEngine {
    /// `provider: None` runs in heuristic-only mode; `patterns: None` disables
    /// pattern boosts and learning.
    pub fn new(
        provider: Option<Arc<dyn CompletionProvider>>,
        patterns: Option<PatternStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            patterns,
            retry,
        }
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    /// Classify one label
    pub async fn classify(&self, request: &ClassificationRequest) -> ClassificationResult {
        if request.candidates.is_empty() {
            return ClassificationResult::unclassifiable();
        }

        let Some(provider) = &self.provider else {
            return self.heuristic(request, ClassificationOutcome::Heuristic).await;
        };

        let shown = &request.candidates[..request.candidates.len().min(prompt::SINGLE_PROMPT_CANDIDATES)];
        let completion = prompt::single_request(request);

        let answer = retry_with_backoff(
            "single classification",
            &self.retry,
            ProviderError::is_transient,
            || provider.complete(&completion),
        )
        .await
        .and_then(|content| prompt::parse_single(&content));

        match answer {
            Ok(raw) => sanitize(raw, shown),
            Err(err) => {
                tracing::warn!(error = %err, "Provider classification failed, using heuristic");
                self.heuristic(request, ClassificationOutcome::Fallback).await
            }
        }
    }

    /// Classify several labels with one provider call
    ///
    /// Results come back in request order. Requests without candidates get the
    /// unclassifiable sentinel and are left out of the provider prompt.
    pub async fn classify_batch(&self, requests: &[ClassificationRequest]) -> Vec<ClassificationResult> {
        let mut results: Vec<Option<ClassificationResult>> = vec![None; requests.len()];
        let mut pending: Vec<usize> = Vec::with_capacity(requests.len());

        for (i, request) in requests.iter().enumerate() {
            if request.candidates.is_empty() {
                results[i] = Some(ClassificationResult::unclassifiable());
            } else {
                pending.push(i);
            }
        }

        if !pending.is_empty() {
            let resolved = match &self.provider {
                Some(provider) => self.provider_batch(provider.as_ref(), requests, &pending).await,
                None => {
                    let mut out = Vec::with_capacity(pending.len());
                    for &i in &pending {
                        out.push(self.heuristic(&requests[i], ClassificationOutcome::Heuristic).await);
                    }
                    out
                }
            };
            for (i, result) in pending.into_iter().zip(resolved) {
                results[i] = Some(result);
            }
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(ClassificationResult::unclassifiable))
            .collect()
    }

    async fn provider_batch(
        &self,
        provider: &dyn CompletionProvider,
        requests: &[ClassificationRequest],
        pending: &[usize],
    ) -> Vec<ClassificationResult> {
        let batch: Vec<&ClassificationRequest> = pending.iter().map(|&i| &requests[i]).collect();
        let completion = prompt::batch_request(&batch);

        let answer = retry_with_backoff(
            "batch classification",
            &self.retry,
            ProviderError::is_transient,
            || provider.complete(&completion),
        )
        .await
        .and_then(|content| prompt::parse_batch(&content, batch.len()));

        match answer {
            Ok(raws) => batch
                .iter()
                .zip(raws)
                .map(|(request, raw)| {
                    let shown = request.candidates.len().min(prompt::BATCH_PROMPT_CANDIDATES);
                    sanitize(raw, &request.candidates[..shown])
                })
                .collect(),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    items = batch.len(),
                    "Batch classification failed, using heuristic for the whole batch"
                );
                let mut out = Vec::with_capacity(batch.len());
                for request in batch {
                    out.push(self.heuristic(request, ClassificationOutcome::Fallback).await);
                }
                out
            }
        }
    }

    /// Heuristic classification with pattern boosts
    pub async fn heuristic(
        &self,
        request: &ClassificationRequest,
        outcome: ClassificationOutcome,
    ) -> ClassificationResult {
        let boosts = self.boosts(request).await;
        classify_heuristic(&request.label_text, &request.candidates, &boosts, outcome)
    }

    async fn boosts(&self, request: &ClassificationRequest) -> HashMap<String, f64> {
        let Some(patterns) = &self.patterns else {
            return HashMap::new();
        };
        match patterns.boosts(&request.context).await {
            Ok(boosts) => boosts,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load pattern boosts, scoring without them");
                HashMap::new()
            }
        }
    }

    /// Feed a classified row back into the pattern store
    ///
    /// Unclassifiable rows teach nothing and are skipped.
    pub async fn learn(
        &self,
        request: &ClassificationRequest,
        result: &ClassificationResult,
    ) -> nacre_common::Result<()> {
        let Some(patterns) = &self.patterns else {
            return Ok(());
        };
        if result.outcome == ClassificationOutcome::Unclassifiable {
            return Ok(());
        }
        patterns
            .update(&request.context, &result.chosen_code, result.confidence)
            .await
    }
}
