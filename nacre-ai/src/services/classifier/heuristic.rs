//! Local keyword scorer used without a provider or after a provider failure
//!
//! Each candidate scores the character length of every keyword found in the
//! normalised label, plus its learned pattern boost. Confidence is
//! `clamp(score × 2, 30, 80)` truncated to an integer.

use std::collections::HashMap;

use super::sanitize::alternatives_from;
use crate::models::{CatalogEntry, ClassificationOutcome, ClassificationResult};
use crate::utils::text::normalize_text;

const MIN_CONFIDENCE: f64 = 30.0;
const MAX_CONFIDENCE: f64 = 80.0;
const ALTERNATIVE_STEP: i64 = 10;
const ALTERNATIVE_FLOOR: i64 = 10;

/// Keyword score of one candidate against a normalised label
fn keyword_score(normalized_label: &str, candidate: &CatalogEntry) -> f64 {
    candidate
        .keywords
        .iter()
        .map(|keyword| (keyword, normalize_text(keyword)))
        .filter(|(_, normalized)| !normalized.is_empty() && normalized_label.contains(normalized.as_str()))
        .map(|(keyword, _)| keyword.chars().count() as f64)
        .sum()
}

/// Classify `label` among `candidates` without the provider
///
/// `boosts` maps codes to learned weights (see `PatternStore::boosts`).
/// Ties keep candidate order. `outcome` records why the heuristic ran and is
/// replaced by `Unclassifiable` when there are no candidates.
pub fn classify_heuristic(
    label: &str,
    candidates: &[CatalogEntry],
    boosts: &HashMap<String, f64>,
    outcome: ClassificationOutcome,
) -> ClassificationResult {
    if candidates.is_empty() {
        return ClassificationResult::unclassifiable();
    }

    let normalized_label = normalize_text(label);
    let mut scored: Vec<(&CatalogEntry, f64)> = candidates
        .iter()
        .map(|candidate| {
            let boost = boosts.get(&candidate.code).copied().unwrap_or(0.0);
            (candidate, keyword_score(&normalized_label, candidate) + boost)
        })
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let (best, best_score) = scored[0];
    let confidence = (best_score * 2.0).clamp(MIN_CONFIDENCE, MAX_CONFIDENCE).floor() as i64;

    let ranked: Vec<&CatalogEntry> = scored.iter().map(|(c, _)| *c).collect();
    let alternatives = alternatives_from(
        &ranked,
        &best.code,
        confidence,
        ALTERNATIVE_STEP,
        ALTERNATIVE_FLOOR,
    );

    let explanation = match outcome {
        ClassificationOutcome::Fallback => format!(
            "Classification heuristique après échec du fournisseur IA (score: {:.1})",
            best_score
        ),
        _ => format!("Classification heuristique (score: {:.1})", best_score),
    };

    ClassificationResult {
        chosen_code: best.code.clone(),
        chosen_category: best.category.clone(),
        confidence: confidence as u8,
        explanation: Some(explanation),
        alternatives,
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<CatalogEntry> {
        vec![
            CatalogEntry::new("TR.02", "Transport", vec!["colis".into(), "livraison".into()]),
            CatalogEntry::new("AB.01", "Fournitures", vec!["papier".into(), "ramette".into()]),
            CatalogEntry::new("EN.03", "Energie", vec!["électricité".into()]),
        ]
    }

    #[test]
    fn test_keyword_match_wins() {
        let result = classify_heuristic(
            "Achat PAPIER ramettes A4",
            &candidates(),
            &HashMap::new(),
            ClassificationOutcome::Heuristic,
        );
        assert_eq!(result.chosen_code, "AB.01");
        // papier (6) + ramette (7) = 13 → 26 → clamped to 30
        assert_eq!(result.confidence, 30);
        assert_eq!(result.outcome, ClassificationOutcome::Heuristic);
        assert_eq!(result.alternatives.len(), 2);
        assert_eq!(result.alternatives[0].confidence, 20);
    }

    #[test]
    fn test_accented_keyword_matches_plain_label() {
        let result = classify_heuristic(
            "Facture electricite siege social et bureaux annexes",
            &candidates(),
            &HashMap::new(),
            ClassificationOutcome::Heuristic,
        );
        assert_eq!(result.chosen_code, "EN.03");
    }

    #[test]
    fn test_confidence_capped() {
        let long = vec![CatalogEntry::new(
            "TR.02",
            "Transport",
            vec!["transport international de marchandises".into(), "livraison".into()],
        )];
        let result = classify_heuristic(
            "transport international de marchandises livraison express",
            &long,
            &HashMap::new(),
            ClassificationOutcome::Fallback,
        );
        assert_eq!(result.confidence, 80);
        assert!(result.explanation.unwrap().contains("échec"));
    }

    #[test]
    fn test_no_match_keeps_candidate_order() {
        let result = classify_heuristic("xyz", &candidates(), &HashMap::new(), ClassificationOutcome::Heuristic);
        assert_eq!(result.chosen_code, "TR.02");
        assert_eq!(result.confidence, 30);
    }

    #[test]
    fn test_pattern_boost_shifts_choice() {
        let mut boosts = HashMap::new();
        boosts.insert("EN.03".to_string(), 4.8);
        let result = classify_heuristic("xyz", &candidates(), &boosts, ClassificationOutcome::Heuristic);
        assert_eq!(result.chosen_code, "EN.03");
    }

    #[test]
    fn test_fractional_score_truncates() {
        let mut boosts = HashMap::new();
        boosts.insert("TR.02".to_string(), 10.75);
        let result = classify_heuristic("Envoi colis", &candidates(), &boosts, ClassificationOutcome::Heuristic);
        assert_eq!(result.chosen_code, "TR.02");
        // colis (5) + 10.75 = 15.75 → 31.5
        assert_eq!(result.confidence, 31);
    }

    #[test]
    fn test_no_candidates_is_unclassifiable() {
        let result = classify_heuristic("papier", &[], &HashMap::new(), ClassificationOutcome::Fallback);
        assert_eq!(result.chosen_code, "ZZ.99");
        assert_eq!(result.outcome, ClassificationOutcome::Unclassifiable);
        assert!((10..=30).contains(&result.confidence));
    }
}
