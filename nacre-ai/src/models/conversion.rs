//! Conversion job record
//!
//! A conversion is created when a job starts, patched as rows land, and is
//! terminal once its status reaches completed, failed or error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use uuid::Uuid;

use super::RowClassification;

/// Key-value statistics attached to a conversion
pub type ConversionStats = Map<String, Value>;

/// Conversion lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionStatus {
    /// Created, rows being prepared
    Running,
    /// Rows being classified
    Processing,
    /// Every prepared row persisted
    Completed,
    /// Stopped before finishing (cancelled or setup failure)
    Failed,
    /// Unexpected error during orchestration
    Error,
}

impl ConversionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionStatus::Running => "running",
            ConversionStatus::Processing => "processing",
            ConversionStatus::Completed => "completed",
            ConversionStatus::Failed => "failed",
            ConversionStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConversionStatus::Completed | ConversionStatus::Failed | ConversionStatus::Error
        )
    }
}

impl FromStr for ConversionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ConversionStatus::Running),
            "processing" => Ok(ConversionStatus::Processing),
            "completed" => Ok(ConversionStatus::Completed),
            "failed" => Ok(ConversionStatus::Failed),
            "error" => Ok(ConversionStatus::Error),
            other => Err(format!("Unknown conversion status: {}", other)),
        }
    }
}

impl std::fmt::Display for ConversionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conversion metadata plus its accumulated rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversion {
    pub id: Uuid,
    pub upload_id: String,
    pub status: ConversionStatus,
    pub total_rows: usize,
    pub processed_rows: usize,
    pub stats: ConversionStats,
    /// Caller-supplied metadata recorded at creation (parameters, source name)
    pub meta: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Row results ordered by `row_index`; empty when listed without rows
    #[serde(default)]
    pub rows: Vec<RowClassification>,
}

impl Conversion {
    /// Percentage of rows persisted (0.0 when nothing to do)
    pub fn progress_pct(&self) -> f64 {
        if self.total_rows == 0 {
            return 0.0;
        }
        (self.processed_rows as f64 / self.total_rows as f64 * 100.0).min(100.0)
    }
}

/// Partial update applied by the conversion store
///
/// `stats` entries are merged key by key into the stored map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversionPatch {
    pub status: Option<ConversionStatus>,
    pub total_rows: Option<usize>,
    pub processed_rows: Option<usize>,
    pub stats: Option<ConversionStats>,
}

impl ConversionPatch {
    pub fn status(status: ConversionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_total_rows(mut self, total_rows: usize) -> Self {
        self.total_rows = Some(total_rows);
        self
    }

    pub fn with_stats(mut self, stats: ConversionStats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.total_rows.is_none()
            && self.processed_rows.is_none()
            && self.stats.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip_and_terminal() {
        for status in [
            ConversionStatus::Running,
            ConversionStatus::Processing,
            ConversionStatus::Completed,
            ConversionStatus::Failed,
            ConversionStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<ConversionStatus>().unwrap(), status);
        }
        assert!(!ConversionStatus::Processing.is_terminal());
        assert!(ConversionStatus::Error.is_terminal());
        assert!("done".parse::<ConversionStatus>().is_err());
    }

    #[test]
    fn test_patch_builders() {
        assert!(ConversionPatch::default().is_empty());
        let patch = ConversionPatch::status(ConversionStatus::Processing).with_total_rows(4);
        assert_eq!(patch.total_rows, Some(4));
        assert!(!patch.is_empty());
    }
}
