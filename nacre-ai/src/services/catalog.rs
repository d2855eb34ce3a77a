//! Reference code catalog
//!
//! Loads the delimited catalog once and answers lexical and fuzzy candidate
//! queries. A missing or unreadable file yields an empty catalog: every query
//! then returns no candidates and the engine answers with the unclassifiable
//! sentinel.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::models::{CatalogEntry, RowContext};
use crate::utils::delimited::{read_delimited_file, RawRow};
use crate::utils::text::{token_set_ratio, tokenize};

const CODE_HEADERS: [&str; 4] = ["code", "Code", "code_nacre", "codeNACRE"];
const CATEGORY_HEADERS: [&str; 7] = [
    "category",
    "Category",
    "categorie_description",
    "categorie",
    "Categorie",
    "description",
    "Description",
];
const KEYWORD_HEADERS: [&str; 3] = ["keywords", "mots_cles", "mots-clés"];

/// First non-blank value among header variants
fn field<'a>(row: &'a RawRow, headers: &[&str]) -> Option<&'a str> {
    headers
        .iter()
        .filter_map(|h| row.get(*h))
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
}

/// Loaded catalog (immutable)
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    source: Option<PathBuf>,
}

impl Catalog {
    /// Load from a delimited file; never fails
    pub fn load(path: &Path) -> Self {
        match read_delimited_file(path) {
            Ok(rows) => {
                let entries = Self::entries_from_rows(&rows);
                info!(
                    path = %path.display(),
                    entries = entries.len(),
                    skipped = rows.len() - entries.len(),
                    "Catalog loaded"
                );
                Self {
                    entries,
                    source: Some(path.to_path_buf()),
                }
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Catalog unavailable, continuing with empty catalog"
                );
                Self {
                    entries: Vec::new(),
                    source: Some(path.to_path_buf()),
                }
            }
        }
    }

    /// Build from already constructed entries (fixtures, tests)
    pub fn from_entries(entries: Vec<CatalogEntry>) -> Self {
        Self {
            entries,
            source: None,
        }
    }

    /// Rows lacking a code or a category are skipped
    fn entries_from_rows(rows: &[RawRow]) -> Vec<CatalogEntry> {
        rows.iter()
            .filter_map(|row| {
                let code = field(row, &CODE_HEADERS)?;
                let category = field(row, &CATEGORY_HEADERS)?;
                let keywords = field(row, &KEYWORD_HEADERS)
                    .map(|raw| raw.split(';').map(str::to_string).collect())
                    .unwrap_or_default();
                Some(CatalogEntry::new(code, category, keywords))
            })
            .collect()
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// File the catalog was loaded from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn get(&self, code: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.code == code)
    }

    /// Token-overlap candidates
    ///
    /// Entries are ranked by the number of query tokens found among their
    /// category and keyword tokens. When nothing overlaps the first `top_k`
    /// entries are returned, so the result is non-empty whenever the catalog is.
    pub fn lexical_candidates(&self, text: &str, top_k: usize) -> Vec<CatalogEntry> {
        let query: HashSet<String> = tokenize(text).into_iter().collect();

        let mut scored: Vec<(usize, &CatalogEntry)> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let mut bucket: HashSet<String> = tokenize(&entry.category).into_iter().collect();
                for keyword in &entry.keywords {
                    bucket.extend(tokenize(keyword));
                }
                let overlap = query.intersection(&bucket).count();
                (overlap > 0).then_some((overlap, entry))
            })
            .collect();

        if scored.is_empty() {
            return self.entries.iter().take(top_k).cloned().collect();
        }

        // Stable sort keeps catalog order among ties
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().take(top_k).map(|(_, e)| e.clone()).collect()
    }

    /// Fuzzy token-set candidates (default candidate source)
    ///
    /// The query is the label followed by `key: value` context pairs, joined by
    /// ` | `, and is scored against each entry's aggregated text.
    pub fn fuzzy_candidates(&self, label: &str, context: &RowContext, top_k: usize) -> Vec<CatalogEntry> {
        let query = fuzzy_query(label, context);

        let mut scored: Vec<(f64, &CatalogEntry)> = self
            .entries
            .iter()
            .map(|entry| (token_set_ratio(&query, &entry.aggregated_text), entry))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(top_k).map(|(_, e)| e.clone()).collect()
    }
}

/// `label | key: value | ...`
fn fuzzy_query(label: &str, context: &RowContext) -> String {
    let mut parts = vec![label.trim().to_string()];
    parts.extend(context.iter().map(|(k, v)| format!("{}: {}", k, v)));
    parts.join(" | ")
}

/// Process-wide catalog holder with explicit lifecycle
///
/// Readers take a cheap `Arc` snapshot; `reset` reloads from disk and swaps the
/// snapshot without disturbing readers holding the previous one.
pub struct CatalogService {
    path: PathBuf,
    current: RwLock<Arc<Catalog>>,
}

impl CatalogService {
    /// Load the catalog at `path`
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let catalog = Catalog::load(&path);
        Self {
            path,
            current: RwLock::new(Arc::new(catalog)),
        }
    }

    /// Wrap an in-memory catalog; `reset` will read `path`
    pub fn with_catalog(path: impl Into<PathBuf>, catalog: Catalog) -> Self {
        Self {
            path: path.into(),
            current: RwLock::new(Arc::new(catalog)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current snapshot
    pub fn current(&self) -> Arc<Catalog> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Reload from disk and replace the snapshot
    pub fn reset(&self) -> Arc<Catalog> {
        let catalog = Arc::new(Catalog::load(&self.path));
        match self.current.write() {
            Ok(mut guard) => *guard = Arc::clone(&catalog),
            Err(poisoned) => *poisoned.into_inner() = Arc::clone(&catalog),
        }
        catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_catalog() -> Catalog {
        Catalog::from_entries(vec![
            CatalogEntry::new("AB.01", "Fournitures de bureau", vec!["papier".into(), "ramettes".into(), "stylos".into()]),
            CatalogEntry::new("TR.02", "Transport de marchandises", vec!["colis".into(), "livraison".into(), "fret".into()]),
            CatalogEntry::new("EN.03", "Electricite", vec!["energie".into(), "edf".into()]),
        ])
    }

    #[test]
    fn test_load_with_header_variants() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("catalog.csv");
        std::fs::write(
            &path,
            "code_nacre;categorie;mots_cles\nab01;Fournitures de bureau;papier; stylos\n;Sans code;x\nTR.02;;colis\nEN.03;Électricité;énergie;edf\n",
        )
        .unwrap();

        let catalog = Catalog::load(&path);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.entries()[0].code, "AB.01");
        assert_eq!(catalog.entries()[1].category, "Electricite");
        assert_eq!(catalog.source(), Some(path.as_path()));
    }

    #[test]
    fn test_missing_file_gives_empty_catalog() {
        let catalog = Catalog::load(Path::new("/nonexistent/catalog.csv"));
        assert!(catalog.is_empty());
        assert!(catalog.lexical_candidates("papier", 5).is_empty());
        assert!(catalog.fuzzy_candidates("papier", &RowContext::new(), 5).is_empty());
    }

    #[test]
    fn test_lexical_ranks_by_overlap() {
        let catalog = sample_catalog();
        let candidates = catalog.lexical_candidates("Livraison colis express", 2);
        assert_eq!(candidates[0].code, "TR.02");
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn test_lexical_falls_back_to_first_entries() {
        let catalog = sample_catalog();
        let candidates = catalog.lexical_candidates("zzz", 2);
        let codes: Vec<_> = candidates.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(codes, vec!["AB.01", "TR.02"]);
    }

    #[test]
    fn test_fuzzy_ranks_related_entry_first() {
        let catalog = sample_catalog();
        let candidates = catalog.fuzzy_candidates("Achat papier ramettes", &RowContext::new(), 3);
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0].code, "AB.01");

        let candidates = catalog.fuzzy_candidates("Transport colis", &RowContext::new(), 1);
        assert_eq!(candidates[0].code, "TR.02");
    }

    #[test]
    fn test_fuzzy_is_deterministic() {
        let catalog = sample_catalog();
        let context = RowContext::new().with("fournisseur", "La Poste");
        let first = catalog.fuzzy_candidates("envoi colis", &context, 3);
        for _ in 0..5 {
            assert_eq!(catalog.fuzzy_candidates("envoi colis", &context, 3), first);
        }
    }

    #[test]
    fn test_fuzzy_query_includes_context() {
        let context = RowContext::new().with("fournisseur", "EDF").with("compte", "606100");
        assert_eq!(
            fuzzy_query(" Facture ", &context),
            "Facture | compte: 606100 | fournisseur: EDF"
        );
    }

    #[test]
    fn test_service_reset_reloads_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("catalog.csv");
        std::fs::write(&path, "code;category;keywords\nAB.01;Bureau;papier\n").unwrap();

        let service = CatalogService::load(&path);
        let before = service.current();
        assert_eq!(before.len(), 1);

        std::fs::write(&path, "code;category;keywords\nAB.01;Bureau;papier\nTR.02;Transport;colis\n").unwrap();
        service.reset();
        assert_eq!(service.current().len(), 2);
        // Old snapshot untouched
        assert_eq!(before.len(), 1);
    }
}
