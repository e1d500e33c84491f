use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::file::ProcessingMode;
use crate::tenant::TenantId;

/// Files submitted together. Completes as a unit for cross-file analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: String,
    pub tenant_id: TenantId,
    pub project_id: String,
    pub mode: ProcessingMode,
    pub glossary_id: Option<String>,
    pub file_ids: Vec<String>,
    /// Set exactly once, when every member file is terminal.
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set exactly once, by the single cross-file pass.
    pub cross_file_analyzed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossFileKind {
    /// Same normalized source translated differently.
    InconsistentTranslation,
    /// Glossary term not honoured in one or more files.
    TerminologyMismatch,
}

impl CrossFileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrossFileKind::InconsistentTranslation => "inconsistent_translation",
            CrossFileKind::TerminologyMismatch => "terminology_mismatch",
        }
    }
}

impl std::str::FromStr for CrossFileKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inconsistent_translation" => Ok(CrossFileKind::InconsistentTranslation),
            "terminology_mismatch" => Ok(CrossFileKind::TerminologyMismatch),
            _ => Err(format!("Unknown cross-file finding kind: {}", s)),
        }
    }
}

/// A batch-scoped finding referencing every file involved.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossFileFinding {
    pub id: String,
    pub tenant_id: TenantId,
    pub batch_id: String,
    pub kind: CrossFileKind,
    pub source_text: String,
    pub description: String,
    pub file_ids: Vec<String>,
    pub segment_ids: Vec<String>,
    pub dedup_key: String,
    pub created_at: DateTime<Utc>,
}
