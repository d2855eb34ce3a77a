//! Provider output validation
//!
//! The chosen code must be one of the candidates the provider was shown.
//! Anything else is replaced by the first candidate with a confidence penalty
//! and surfaced as [`ClassificationOutcome::Corrected`].

use serde_json::Value;

use super::prompt::RawClassification;
use crate::models::{
    normalize_code, Alternative, CatalogEntry, ClassificationOutcome, ClassificationResult,
    MAX_ALTERNATIVES,
};

/// Confidence assumed when the provider omits it
const DEFAULT_CONFIDENCE: i64 = 50;
/// Penalty applied to an out-of-candidate answer
const CORRECTION_PENALTY: i64 = 20;
/// Lowest confidence after a correction
const CORRECTION_FLOOR: i64 = 30;
/// Confidence step between consecutive alternatives
const ALTERNATIVE_STEP: i64 = 15;
/// Lowest confidence of an alternative
const ALTERNATIVE_FLOOR: i64 = 10;

/// Prefix of the explanation of a corrected result
pub const CORRECTION_NOTE: &str = "Code corrigé automatiquement.";

/// Confidence as an integer; numeric strings accepted, clamped to 0-100
fn confidence_from(value: Option<&Value>) -> i64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|v| v.is_finite())
        .map(|v| v.round() as i64)
        .unwrap_or(DEFAULT_CONFIDENCE)
        .clamp(0, 100)
}

/// Alternatives: candidates other than the chosen one, decreasing confidence
pub(crate) fn alternatives_from(
    ranked: &[&CatalogEntry],
    chosen_code: &str,
    confidence: i64,
    step: i64,
    floor: i64,
) -> Vec<Alternative> {
    ranked
        .iter()
        .filter(|c| c.code != chosen_code)
        .take(MAX_ALTERNATIVES)
        .enumerate()
        .map(|(i, c)| Alternative {
            code: c.code.clone(),
            category: c.category.clone(),
            confidence: (confidence - step * (i as i64 + 1)).max(floor).clamp(0, 100) as u8,
        })
        .collect()
}

/// Validate a provider answer against the candidates it was shown
///
/// `candidates` must be non-empty; the engine answers empty candidate lists
/// with the unclassifiable sentinel before calling the provider.
pub fn sanitize(raw: RawClassification, candidates: &[CatalogEntry]) -> ClassificationResult {
    let Some(first) = candidates.first() else {
        return ClassificationResult::unclassifiable();
    };

    let mut confidence = confidence_from(raw.confidence.as_ref());
    let explanation = raw
        .explanation
        .filter(|e| !e.trim().is_empty())
        .unwrap_or_else(|| "Classification automatique".to_string());
    let returned_code = raw.chosen_code.as_deref().map(normalize_code).unwrap_or_default();

    let (chosen, outcome, explanation) = match candidates.iter().find(|c| c.code == returned_code) {
        Some(entry) => (entry, ClassificationOutcome::Provider, explanation),
        None => {
            tracing::warn!(
                returned_code = %returned_code,
                substituted = %first.code,
                "Provider chose a code outside the candidates, substituting first candidate"
            );
            confidence = (confidence - CORRECTION_PENALTY).max(CORRECTION_FLOOR);
            (
                first,
                ClassificationOutcome::Corrected,
                format!("{} {}", CORRECTION_NOTE, explanation),
            )
        }
    };

    // The catalog label wins over whatever category text the provider echoed
    let chosen_category = if chosen.category.is_empty() {
        raw.chosen_category.unwrap_or_default()
    } else {
        chosen.category.clone()
    };

    let ranked: Vec<&CatalogEntry> = candidates.iter().collect();
    let alternatives = alternatives_from(
        &ranked,
        &chosen.code,
        confidence,
        ALTERNATIVE_STEP,
        ALTERNATIVE_FLOOR,
    );

    ClassificationResult {
        chosen_code: chosen.code.clone(),
        chosen_category,
        confidence: confidence as u8,
        explanation: Some(explanation),
        alternatives,
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candidates() -> Vec<CatalogEntry> {
        ["AB.01", "TR.02", "EN.03", "AL.04", "IT.05", "SE.06", "VO.07"]
            .iter()
            .map(|code| CatalogEntry::new(code, &format!("Cat {}", code), vec![]))
            .collect()
    }

    fn raw(code: &str, confidence: Value) -> RawClassification {
        RawClassification {
            chosen_code: Some(code.to_string()),
            chosen_category: Some("whatever".to_string()),
            confidence: Some(confidence),
            explanation: Some("papier".to_string()),
        }
    }

    #[test]
    fn test_valid_code_kept() {
        let result = sanitize(raw("tr02", json!(85)), &candidates());
        assert_eq!(result.chosen_code, "TR.02");
        assert_eq!(result.chosen_category, "Cat TR.02");
        assert_eq!(result.confidence, 85);
        assert_eq!(result.outcome, ClassificationOutcome::Provider);
        assert_eq!(result.explanation.as_deref(), Some("papier"));

        // Chosen code excluded from alternatives, at most five
        let codes: Vec<_> = result.alternatives.iter().map(|a| a.code.as_str()).collect();
        assert_eq!(codes, vec!["AB.01", "EN.03", "AL.04", "IT.05", "SE.06"]);
        let confidences: Vec<_> = result.alternatives.iter().map(|a| a.confidence).collect();
        assert_eq!(confidences, vec![70, 55, 40, 25, 10]);
    }

    #[test]
    fn test_out_of_candidate_code_corrected() {
        let result = sanitize(raw("ZZ.42", json!(90)), &candidates());
        assert_eq!(result.chosen_code, "AB.01");
        assert_eq!(result.confidence, 70);
        assert_eq!(result.outcome, ClassificationOutcome::Corrected);
        assert!(result.explanation.unwrap().starts_with(CORRECTION_NOTE));
    }

    #[test]
    fn test_correction_floor() {
        let result = sanitize(raw("XX.00", json!(35)), &candidates());
        assert_eq!(result.confidence, 30);
    }

    #[test]
    fn test_confidence_parsing_and_clamping() {
        assert_eq!(confidence_from(Some(&json!(150))), 100);
        assert_eq!(confidence_from(Some(&json!(-4))), 0);
        assert_eq!(confidence_from(Some(&json!("72%"))), 72);
        assert_eq!(confidence_from(Some(&json!(0.5))), 1);
        assert_eq!(confidence_from(Some(&json!("high"))), 50);
        assert_eq!(confidence_from(None), 50);
    }

    #[test]
    fn test_missing_fields_default() {
        let result = sanitize(RawClassification::default(), &candidates());
        assert_eq!(result.outcome, ClassificationOutcome::Corrected);
        assert_eq!(result.confidence, 30);
        assert_eq!(result.chosen_code, "AB.01");
    }

    #[test]
    fn test_empty_candidates_yield_sentinel() {
        let result = sanitize(raw("AB.01", json!(90)), &[]);
        assert_eq!(result.outcome, ClassificationOutcome::Unclassifiable);
    }
}
