//! Catalog fixtures

use std::path::{Path, PathBuf};
use std::sync::Arc;

use nacre_ai::models::CatalogEntry;
use nacre_ai::services::{Catalog, CatalogService};

/// Small catalog covering paper supplies, parcel transport and catering
pub fn sample_catalog() -> Catalog {
    Catalog::from_entries(vec![
        CatalogEntry::new(
            "AB.01",
            "Fournitures de bureau",
            vec!["papier".into(), "stylo".into(), "enveloppe".into()],
        ),
        CatalogEntry::new(
            "TR.02",
            "Transport de marchandises",
            vec!["colis".into(), "livraison".into(), "fret".into()],
        ),
        CatalogEntry::new(
            "RE.03",
            "Restauration",
            vec!["repas".into(), "traiteur".into()],
        ),
    ])
}

pub fn sample_catalog_service() -> Arc<CatalogService> {
    Arc::new(CatalogService::with_catalog("unused-catalog.csv", sample_catalog()))
}

/// Write the sample catalog as a comma separated file and return its path
pub fn write_catalog_csv(dir: &Path) -> std::io::Result<PathBuf> {
    let path = dir.join("nacre_catalog.csv");
    std::fs::write(
        &path,
        "code,category,keywords\n\
         AB.01,Fournitures de bureau,papier;stylo;enveloppe\n\
         TR.02,Transport de marchandises,colis;livraison;fret\n\
         RE.03,Restauration,repas;traiteur\n",
    )?;
    Ok(path)
}
