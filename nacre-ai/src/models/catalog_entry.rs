//! Reference catalog entry

use serde::{Deserialize, Serialize};

use crate::utils::text::strip_accents;

/// One code of the reference catalog
///
/// Immutable after load. `aggregated_text` is derived from category and
/// keywords and is what fuzzy retrieval scores against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Canonical code, e.g. `AA.01`
    pub code: String,
    /// Human label
    pub category: String,
    /// Ordered keyword list
    pub keywords: Vec<String>,
    /// `"{category} | {keywords joined by space}"`
    pub aggregated_text: String,
}

impl CatalogEntry {
    /// Build an entry, normalising the code and stripping accents from the text fields
    pub fn new(code: &str, category: &str, keywords: Vec<String>) -> Self {
        let category = strip_accents(category.trim());
        let keywords: Vec<String> = keywords
            .iter()
            .map(|k| strip_accents(k.trim()))
            .filter(|k| !k.is_empty())
            .collect();
        let aggregated_text = format!("{} | {}", category, keywords.join(" "));

        Self {
            code: normalize_code(code),
            category,
            keywords,
            aggregated_text,
        }
    }

    /// Text sent to the embedding provider: category followed by keywords
    pub fn embedding_text(&self) -> String {
        if self.keywords.is_empty() {
            self.category.clone()
        } else {
            format!("{} {}", self.category, self.keywords.join(" "))
        }
    }
}

/// Canonical code form: trimmed, accents stripped, uppercase; `AA01` becomes `AA.01`
pub fn normalize_code(raw: &str) -> String {
    let code = strip_accents(raw.trim()).to_uppercase();
    let bytes = code.as_bytes();

    if bytes.len() == 4
        && bytes[..2].iter().all(u8::is_ascii_uppercase)
        && bytes[2..].iter().all(u8::is_ascii_digit)
    {
        return format!("{}.{}", &code[..2], &code[2..]);
    }

    code
}
