//! In-process providers standing in for the OpenAI-compatible API

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use nacre_ai::services::{CompletionProvider, CompletionRequest, EmbeddingProvider};
use nacre_ai::ProviderError;

/// First candidate code listed under each `LIGNE n:` block of a batch prompt
pub fn batch_candidate_codes(user: &str) -> Vec<String> {
    user.split("\nLIGNE ")
        .skip(1)
        .map(|block| {
            block
                .lines()
                .map(str::trim)
                .find_map(|line| line.strip_prefix("- "))
                .and_then(|line| line.split(':').next())
                .unwrap_or("")
                .to_string()
        })
        .collect()
}

/// Answers every label with its first candidate
///
/// With a delay step, call `n` sleeps `step * (8 - n)` (never below zero), so
/// early batches finish after later ones.
#[derive(Default)]
pub struct FirstCandidateProvider {
    delay_step: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl FirstCandidateProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_decreasing_delays(step: Duration) -> Self {
        Self {
            delay_step: Some(step),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping calls observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn answer(user: &str) -> String {
        if user.starts_with("CLASSIFICATION BATCH") {
            let items: Vec<Value> = batch_candidate_codes(user)
                .into_iter()
                .map(|code| {
                    json!({
                        "chosen_code": code,
                        "chosen_category": "",
                        "confidence": 90,
                        "explanation": "premier candidat"
                    })
                })
                .collect();
            Value::Array(items).to_string()
        } else {
            let code = user
                .lines()
                .find_map(|line| line.strip_prefix("- "))
                .and_then(|line| line.split(':').next())
                .unwrap_or("");
            json!({ "chosen_code": code, "confidence": 90 }).to_string()
        }
    }
}

#[async_trait]
impl CompletionProvider for FirstCandidateProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.user.clone());

        if let Some(step) = self.delay_step {
            let factor = 8u32.saturating_sub(n as u32);
            tokio::time::sleep(step * factor).await;
        } else {
            tokio::task::yield_now().await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Self::answer(&request.user))
    }
}

/// Batch answers always hold one item too few
#[derive(Default)]
pub struct BrokenBatchProvider {
    calls: AtomicUsize,
}

impl BrokenBatchProvider {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for BrokenBatchProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let codes = batch_candidate_codes(&request.user);
        let items: Vec<Value> = codes
            .iter()
            .skip(1)
            .map(|code| json!({ "chosen_code": code, "confidence": 90 }))
            .collect();
        Ok(Value::Array(items).to_string())
    }
}

/// 26-dimension letter histogram; texts sharing letters score close to 1
#[derive(Default)]
pub struct LetterEmbedder {
    calls: AtomicUsize,
}

impl LetterEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; 26];
        for c in text.to_lowercase().chars() {
            if c.is_ascii_lowercase() {
                v[(c as u8 - b'a') as usize] += 1.0;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for LetterEmbedder {
    fn model(&self) -> &str {
        "letters-26"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// Every call times out
#[derive(Default)]
pub struct TimeoutProvider {
    calls: AtomicUsize,
}

impl TimeoutProvider {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for TimeoutProvider {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProviderError::Timeout("request timed out after 60s".to_string()))
    }
}
