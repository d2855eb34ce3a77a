//! Text normalisation and fuzzy similarity
//!
//! Labels and catalog entries come from spreadsheets typed by hand, so every
//! comparison goes through the same folding: diacritics stripped, lowercase,
//! punctuation dropped, whitespace collapsed.

use std::collections::BTreeSet;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Remove diacritics (NFKD decomposition, combining marks dropped)
pub fn strip_accents(text: &str) -> String {
    text.nfkd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Fold text for matching: strip accents, lowercase, keep `[a-z0-9-]` and
/// single spaces.
///
/// ```
/// use nacre_ai::utils::text::normalize_text;
///
/// assert_eq!(normalize_text("  Électricité,  Gaz!"), "electricite gaz");
/// ```
pub fn normalize_text(text: &str) -> String {
    let folded = strip_accents(text).to_lowercase();
    let mut out = String::with_capacity(folded.len());
    let mut pending_space = false;

    for c in folded.chars() {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
        } else if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.push(c);
        }
    }

    out
}

/// Split normalised text on whitespace, `-` and `/`
///
/// `/` never survives [`normalize_text`], so splitting happens on the raw
/// input first to keep "papier/carton" as two tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split('/')
        .map(normalize_text)
        .flat_map(|part| {
            part.split(|c: char| c.is_whitespace() || c == '-')
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Similarity between two strings on a 0-100 scale
fn ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 100.0;
    }
    strsim::normalized_levenshtein(a, b) * 100.0
}

/// Fuzzy token-set similarity (0-100)
///
/// Both strings are normalised and reduced to sorted token sets. The score is
/// the best pairwise ratio among the shared tokens alone and the shared tokens
/// followed by each side's remaining tokens. One set being a subset of the
/// other scores 100.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let tokens_a: BTreeSet<String> = tokenize(a).into_iter().collect();
    let tokens_b: BTreeSet<String> = tokenize(b).into_iter().collect();

    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let intersection: Vec<&str> = tokens_a.intersection(&tokens_b).map(String::as_str).collect();
    let diff_ab: Vec<&str> = tokens_a.difference(&tokens_b).map(String::as_str).collect();
    let diff_ba: Vec<&str> = tokens_b.difference(&tokens_a).map(String::as_str).collect();

    if !intersection.is_empty() && (diff_ab.is_empty() || diff_ba.is_empty()) {
        return 100.0;
    }

    let sect = intersection.join(" ");
    let combined = |diff: &[&str]| -> String {
        let rest = diff.join(" ");
        if sect.is_empty() {
            rest
        } else {
            format!("{} {}", sect, rest)
        }
    };
    let with_a = combined(&diff_ab);
    let with_b = combined(&diff_ba);

    let mut best = ratio(&with_a, &with_b);
    if !sect.is_empty() {
        best = best.max(ratio(&sect, &with_a)).max(ratio(&sect, &with_b));
    }
    best
}
