//! Row sources
//!
//! A conversion reads its rows through [`RowSource`]: a known row count plus
//! the rows themselves as column → value maps, in file order.

use std::path::{Path, PathBuf};

use crate::utils::delimited::{read_delimited_file, RawRow};
use nacre_common::Result;

/// Tabular input of a conversion
pub trait RowSource: Send + Sync {
    /// Number of data rows (header excluded)
    fn total_rows(&self) -> Result<usize>;

    /// All rows in file order
    fn rows(&self) -> Result<Vec<RawRow>>;
}

/// Rows held in memory
#[derive(Debug, Clone, Default)]
pub struct VecRowSource {
    rows: Vec<RawRow>,
}

impl VecRowSource {
    pub fn new(rows: Vec<RawRow>) -> Self {
        Self { rows }
    }

    /// One row per label under `column`
    pub fn from_labels<S: AsRef<str>>(column: &str, labels: &[S]) -> Self {
        let rows = labels
            .iter()
            .map(|label| {
                let mut row = RawRow::new();
                row.insert(column.to_string(), label.as_ref().to_string());
                row
            })
            .collect();
        Self { rows }
    }
}

impl RowSource for VecRowSource {
    fn total_rows(&self) -> Result<usize> {
        Ok(self.rows.len())
    }

    fn rows(&self) -> Result<Vec<RawRow>> {
        Ok(self.rows.clone())
    }
}

/// Delimited text file (CSV, semicolon or tab separated)
///
/// Encoding and delimiter are detected on every read.
#[derive(Debug, Clone)]
pub struct CsvRowSource {
    path: PathBuf,
}

impl CsvRowSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RowSource for CsvRowSource {
    fn total_rows(&self) -> Result<usize> {
        Ok(self.rows()?.len())
    }

    fn rows(&self) -> Result<Vec<RawRow>> {
        read_delimited_file(&self.path)
    }
}
