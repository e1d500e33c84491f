//! Findings and their vocabularies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::tenant::TenantId;

/// Layer that produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layer {
    L1,
    L2,
    L3,
    #[serde(rename = "cross_file")]
    CrossFile,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::L1 => "L1",
            Layer::L2 => "L2",
            Layer::L3 => "L3",
            Layer::CrossFile => "cross_file",
        }
    }
}

impl std::str::FromStr for Layer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "L1" => Ok(Layer::L1),
            "L2" => Ok(Layer::L2),
            "L3" => Ok(Layer::L3),
            "cross_file" => Ok(Layer::CrossFile),
            _ => Err(format!("Unknown layer: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Major,
    Minor,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Major => "major",
            Severity::Minor => "minor",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "critical" => Ok(Severity::Critical),
            "major" => Ok(Severity::Major),
            "minor" => Ok(Severity::Minor),
            _ => Err(format!("Unknown severity: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Open,
    Accepted,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Open => "open",
            ReviewStatus::Accepted => "accepted",
            ReviewStatus::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for ReviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(ReviewStatus::Open),
            "accepted" => Ok(ReviewStatus::Accepted),
            "rejected" => Ok(ReviewStatus::Rejected),
            _ => Err(format!("Unknown review status: {}", s)),
        }
    }
}

/// Internal quality category vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Accuracy,
    Fluency,
    Terminology,
    Consistency,
    Style,
    LocaleConvention,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Accuracy => "accuracy",
            Category::Fluency => "fluency",
            Category::Terminology => "terminology",
            Category::Consistency => "consistency",
            Category::Style => "style",
            Category::LocaleConvention => "locale_convention",
            Category::Other => "other",
        }
    }

    pub fn all() -> &'static [Category] {
        &[
            Category::Accuracy,
            Category::Fluency,
            Category::Terminology,
            Category::Consistency,
            Category::Style,
            Category::LocaleConvention,
            Category::Other,
        ]
    }

    /// Parses an internal category name. Anything unknown becomes `Other`.
    pub fn from_label(label: &str) -> Category {
        let normalized = label.trim().to_lowercase().replace([' ', '-'], "_");
        Category::all()
            .iter()
            .copied()
            .find(|c| c.as_str() == normalized)
            .unwrap_or(Category::Other)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A finding as produced by a layer, before it is attached to a file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFinding {
    pub segment_id: Option<String>,
    pub layer: Layer,
    /// Rule id (L1), tier tag (L2/L3) or analysis kind (cross-file).
    pub rule: String,
    pub category: Category,
    pub severity: Severity,
    pub description: String,
    /// Set by rules whose result needs a second opinion.
    pub ambiguous: bool,
}

impl NewFinding {
    pub fn dedup_key(&self, file_id: &str) -> String {
        dedup_key(file_id, self.layer, &self.rule, self.segment_id.as_deref())
    }
}

/// Deterministic idempotency key for a finding.
///
/// Built from file id, layer, rule and segment id so that re-running a stage
/// over the same segments upserts onto the same rows.
pub fn dedup_key(file_id: &str, layer: Layer, rule: &str, segment_id: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    for part in [file_id, layer.as_str(), rule, segment_id.unwrap_or("-")] {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// A persisted finding.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub id: String,
    pub tenant_id: TenantId,
    pub file_id: String,
    pub segment_id: Option<String>,
    pub layer: Layer,
    pub rule: String,
    pub category: Category,
    pub severity: Severity,
    pub description: String,
    pub ambiguous: bool,
    pub review_status: ReviewStatus,
    pub dedup_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
