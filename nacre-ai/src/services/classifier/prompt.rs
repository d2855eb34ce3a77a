//! Prompt construction and response parsing for the completion provider

use serde::Deserialize;
use serde_json::Value;

use crate::error::ProviderError;
use crate::models::{ClassificationRequest, RowContext};
use crate::services::openai_client::CompletionRequest;

/// Candidates shown to the provider for a single label
pub const SINGLE_PROMPT_CANDIDATES: usize = 10;
/// Candidates shown per label in a batch prompt (payload limit)
pub const BATCH_PROMPT_CANDIDATES: usize = 8;

const TEMPERATURE: f32 = 0.1;
const SINGLE_MAX_TOKENS: u32 = 2000;
const BATCH_MAX_TOKENS: u32 = 4000;

const SYSTEM_PROMPT: &str = "Tu es un expert en classification NACRE. Ta mission est de choisir le code NACRE \
le plus pertinent pour un libellé comptable donné.\n\n\
RÈGLES IMPORTANTES:\n\
1. Analyse attentivement le libellé ET le contexte (fournisseur, compte comptable, montant)\n\
2. Privilégie la précision sémantique : choisis le code le plus spécifique possible\n\
3. Utilise le contexte pour lever les ambiguïtés\n\
4. En cas d'hésitation, préfère un code plus général mais certain\n\
5. La confiance doit refléter ta certitude réelle\n\
6. Choisis obligatoirement un des codes candidats\n\n\
RÉPONSE REQUISE:\n\
Retourne uniquement un JSON valide avec cette structure exacte:\n\
{\n\
  \"chosen_code\": \"XX.YY\",\n\
  \"chosen_category\": \"Description du code\",\n\
  \"confidence\": 85,\n\
  \"explanation\": \"Explication courte de ton choix\"\n\
}\n\n\
La confiance doit être entre 0 et 100. Sois précis et concis.";

const BATCH_SYSTEM_PROMPT: &str = "Tu es un expert en classification NACRE. Ta mission est de classifier plusieurs \
libellés comptables en une seule fois.\n\n\
RÈGLES IMPORTANTES:\n\
1. Analyse chaque libellé avec son contexte (fournisseur, compte comptable, montant)\n\
2. Privilégie la précision sémantique pour chaque classification\n\
3. Utilise le contexte pour lever les ambiguïtés\n\
4. Traite chaque ligne indépendamment et choisis un code parmi ses propres candidats\n\n\
RÉPONSE REQUISE:\n\
Retourne uniquement un JSON array avec cette structure exacte:\n\
[\n\
  {\n\
    \"chosen_code\": \"XX.YY\",\n\
    \"chosen_category\": \"Description du code\",\n\
    \"confidence\": 85,\n\
    \"explanation\": \"Explication courte de ton choix\"\n\
  },\n\
  ...\n\
]\n\n\
Un objet par libellé dans l'ordre donné. La confiance doit être entre 0 et 100.";

/// Provider answer for one label, before sanitisation
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawClassification {
    #[serde(default)]
    pub chosen_code: Option<String>,
    #[serde(default)]
    pub chosen_category: Option<String>,
    /// Number or numeric string; anything else counts as absent
    #[serde(default)]
    pub confidence: Option<Value>,
    #[serde(default)]
    pub explanation: Option<String>,
}

/// `Fournisseur: X | Compte comptable: Y | Montant: Z€`
fn context_line(context: &RowContext) -> String {
    let mut parts = Vec::new();
    if let Some(supplier) = context.supplier() {
        parts.push(format!("Fournisseur: {}", supplier));
    }
    if let Some(account) = context.account() {
        parts.push(format!("Compte comptable: {}", account));
    }
    if let Some(amount) = context.amount() {
        parts.push(format!("Montant: {}€", amount));
    }

    if parts.is_empty() {
        "Aucun contexte".to_string()
    } else {
        parts.join(" | ")
    }
}

/// Completion request for one label
pub fn single_request(request: &ClassificationRequest) -> CompletionRequest {
    let candidates = request
        .candidates
        .iter()
        .take(SINGLE_PROMPT_CANDIDATES)
        .map(|c| format!("- {}: {}", c.code, c.category))
        .collect::<Vec<_>>()
        .join("\n");

    let user = format!(
        "LIBELLÉ À CLASSIFIER: {}\nCONTEXTE: {}\n\nCODES NACRE CANDIDATS:\n{}\n\n\
         Choisis le code NACRE le plus approprié et retourne le résultat en JSON.",
        request.label_text.trim(),
        context_line(&request.context),
        candidates
    );

    CompletionRequest {
        system: SYSTEM_PROMPT.to_string(),
        user,
        temperature: TEMPERATURE,
        max_tokens: SINGLE_MAX_TOKENS,
    }
}

/// Completion request for several labels in one call
pub fn batch_request(requests: &[&ClassificationRequest]) -> CompletionRequest {
    let items = requests
        .iter()
        .enumerate()
        .map(|(i, request)| {
            let candidates = request
                .candidates
                .iter()
                .take(BATCH_PROMPT_CANDIDATES)
                .map(|c| format!("  - {}: {}", c.code, c.category))
                .collect::<Vec<_>>()
                .join("\n");
            format!(
                "LIGNE {}:\nLibellé: {}\nContexte: {}\nCandidats:\n{}",
                i + 1,
                request.label_text.trim(),
                context_line(&request.context),
                candidates
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let user = format!(
        "CLASSIFICATION BATCH DE {} LIBELLÉS:\n\n{}\n\n\
         Classifie chaque libellé et retourne un array JSON de {} résultats.",
        requests.len(),
        items,
        requests.len()
    );

    CompletionRequest {
        system: BATCH_SYSTEM_PROMPT.to_string(),
        user,
        temperature: TEMPERATURE,
        max_tokens: BATCH_MAX_TOKENS,
    }
}

/// Remove a surrounding Markdown code fence (```json ... ```)
pub fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // The info string may be followed by the payload on the same line
    let rest = match rest.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => &rest[4..],
        _ => rest,
    };
    let body = match rest.find('\n') {
        Some(pos) if rest[..pos].trim().chars().all(|c| c.is_ascii_alphanumeric()) => &rest[pos + 1..],
        _ => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Parse a single-label answer (one JSON object)
pub fn parse_single(content: &str) -> Result<RawClassification, ProviderError> {
    let body = strip_code_fences(content);
    match serde_json::from_str::<Value>(body)? {
        Value::Object(map) => Ok(serde_json::from_value(Value::Object(map))?),
        // Some models wrap a lone answer in an array
        Value::Array(mut items) if items.len() == 1 => Ok(serde_json::from_value(items.remove(0))?),
        other => Err(ProviderError::Malformed(format!(
            "Expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

/// Parse a batch answer; the array length must equal `expected`
///
/// An object holding exactly one array field (`{"results": [...]}`) is accepted too.
pub fn parse_batch(content: &str, expected: usize) -> Result<Vec<RawClassification>, ProviderError> {
    let body = strip_code_fences(content);
    let items = match serde_json::from_str::<Value>(body)? {
        Value::Array(items) => items,
        Value::Object(map) => {
            let mut arrays = map.into_iter().filter_map(|(_, v)| match v {
                Value::Array(items) => Some(items),
                _ => None,
            });
            match (arrays.next(), arrays.next()) {
                (Some(items), None) => items,
                _ => {
                    return Err(ProviderError::Malformed(
                        "Expected a JSON array of results".to_string(),
                    ))
                }
            }
        }
        other => {
            return Err(ProviderError::Malformed(format!(
                "Expected a JSON array, got {}",
                json_kind(&other)
            )))
        }
    };

    if items.len() != expected {
        return Err(ProviderError::CountMismatch {
            expected,
            actual: items.len(),
        });
    }

    items
        .into_iter()
        .map(|item| serde_json::from_value(item).map_err(ProviderError::from))
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
