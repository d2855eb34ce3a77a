//! Classification request/result types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::CatalogEntry;

/// Code returned when no candidate exists
pub const UNCLASSIFIABLE_CODE: &str = "ZZ.99";
/// Category paired with [`UNCLASSIFIABLE_CODE`]
pub const UNCLASSIFIABLE_CATEGORY: &str = "Non classé";
/// Confidence of the unclassifiable result
pub const UNCLASSIFIABLE_CONFIDENCE: u8 = 10;
/// Maximum number of alternatives attached to a result
pub const MAX_ALTERNATIVES: usize = 5;

const SUPPLIER_KEYS: [&str; 2] = ["fournisseur", "supplier"];
const ACCOUNT_KEYS: [&str; 3] = ["compte", "compte_comptable", "account"];
const AMOUNT_KEYS: [&str; 2] = ["montant", "amount"];

/// Contextual attributes of a row (column name → raw value)
///
/// Keys are column names as they appear in the source file. Lookups for the
/// well-known attributes accept the usual French and English spellings,
/// case-insensitively. Ordered so prompts and fuzzy queries are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowContext(BTreeMap<String, String>);

impl RowContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an attribute; blank values are ignored
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        if !value.trim().is_empty() {
            self.0.insert(key.into(), value.trim().to_string());
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn lookup(&self, aliases: &[&str]) -> Option<&str> {
        aliases.iter().find_map(|alias| {
            self.0
                .iter()
                .find(|(key, _)| key.trim().eq_ignore_ascii_case(alias))
                .map(|(_, value)| value.as_str())
        })
    }

    /// Supplier name (`fournisseur`, `supplier`)
    pub fn supplier(&self) -> Option<&str> {
        self.lookup(&SUPPLIER_KEYS)
    }

    /// Accounting account (`compte`, `compte_comptable`, `account`)
    pub fn account(&self) -> Option<&str> {
        self.lookup(&ACCOUNT_KEYS)
    }

    /// Amount (`montant`, `amount`)
    pub fn amount(&self) -> Option<&str> {
        self.lookup(&AMOUNT_KEYS)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RowContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut context = RowContext::new();
        for (key, value) in iter {
            context.insert(key, value);
        }
        context
    }
}

/// Input of one classification
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationRequest {
    pub label_text: String,
    pub context: RowContext,
    /// Ordered, bounded candidate list; the result must reference one of these
    pub candidates: Vec<CatalogEntry>,
}

impl ClassificationRequest {
    pub fn new(label_text: impl Into<String>, context: RowContext, candidates: Vec<CatalogEntry>) -> Self {
        Self {
            label_text: label_text.into(),
            context,
            candidates,
        }
    }
}

/// Runner-up code attached to a result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alternative {
    pub code: String,
    pub category: String,
    pub confidence: u8,
}

/// How a result was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationOutcome {
    /// Provider picked one of the supplied candidates
    Provider,
    /// Provider picked a code outside the candidates; first candidate substituted
    Corrected,
    /// Local scoring, no provider configured
    Heuristic,
    /// Local scoring after the provider failed
    Fallback,
    /// No candidates at all; sentinel code
    Unclassifiable,
}

impl ClassificationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationOutcome::Provider => "provider",
            ClassificationOutcome::Corrected => "corrected",
            ClassificationOutcome::Heuristic => "heuristic",
            ClassificationOutcome::Fallback => "fallback",
            ClassificationOutcome::Unclassifiable => "unclassifiable",
        }
    }
}

/// Classification of one label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub chosen_code: String,
    pub chosen_category: String,
    /// 0-100 inclusive
    pub confidence: u8,
    pub explanation: Option<String>,
    /// At most [`MAX_ALTERNATIVES`], best first
    pub alternatives: Vec<Alternative>,
    pub outcome: ClassificationOutcome,
}

impl ClassificationResult {
    /// Sentinel result for a request without candidates
    pub fn unclassifiable() -> Self {
        Self {
            chosen_code: UNCLASSIFIABLE_CODE.to_string(),
            chosen_category: UNCLASSIFIABLE_CATEGORY.to_string(),
            confidence: UNCLASSIFIABLE_CONFIDENCE,
            explanation: Some("Aucun candidat disponible".to_string()),
            alternatives: Vec::new(),
            outcome: ClassificationOutcome::Unclassifiable,
        }
    }
}

/// Persisted classification of one source row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowClassification {
    /// 0-based position in the source file
    pub row_index: usize,
    pub label_raw: String,
    #[serde(flatten)]
    pub result: ClassificationResult,
}

impl RowClassification {
    pub fn new(row_index: usize, label_raw: impl Into<String>, result: ClassificationResult) -> Self {
        Self {
            row_index,
            label_raw: label_raw.into(),
            result,
        }
    }
}
