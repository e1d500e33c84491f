use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tenant::TenantId;

/// Lifecycle of a derived score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreStatus {
    /// Never computed.
    Pending,
    Computed,
    /// A review decision changed after the last computation.
    Stale,
}

impl ScoreStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreStatus::Pending => "pending",
            ScoreStatus::Computed => "computed",
            ScoreStatus::Stale => "stale",
        }
    }
}

impl std::str::FromStr for ScoreStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ScoreStatus::Pending),
            "computed" => Ok(ScoreStatus::Computed),
            "stale" => Ok(ScoreStatus::Stale),
            _ => Err(format!("Unknown score status: {}", s)),
        }
    }
}

/// Per-file quality score. A projection of the findings, never an input to
/// review decisions.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Score {
    pub tenant_id: TenantId,
    pub file_id: String,
    pub mqm_score: f64,
    pub critical_count: u32,
    pub major_count: u32,
    pub minor_count: u32,
    pub segment_count: u32,
    pub passed: bool,
    pub status: ScoreStatus,
    pub computed_at: Option<DateTime<Utc>>,
}
