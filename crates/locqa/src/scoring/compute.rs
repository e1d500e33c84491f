//! MQM-style score aggregation.

use serde::{Deserialize, Serialize};

use crate::model::{Finding, ReviewStatus, Severity};

/// Penalty points per finding of each severity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringWeights {
    pub critical: f64,
    pub major: f64,
    pub minor: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            critical: 25.0,
            major: 5.0,
            minor: 1.0,
        }
    }
}

impl ScoringWeights {
    pub fn weight(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Critical => self.critical,
            Severity::Major => self.major,
            Severity::Minor => self.minor,
        }
    }

    /// Weights must be positive and strictly ordered critical > major > minor.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.minor > 0.0) {
            return Err(format!("minor weight must be positive, got {}", self.minor));
        }
        if !(self.critical > self.major && self.major > self.minor) {
            return Err(format!(
                "weights must satisfy critical > major > minor, got {}/{}/{}",
                self.critical, self.major, self.minor
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeverityCounts {
    pub critical: u32,
    pub major: u32,
    pub minor: u32,
}

impl SeverityCounts {
    /// Counts findings that still stand. Rejected findings are excluded.
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut counts = Self::default();
        for finding in findings
            .iter()
            .filter(|f| f.review_status != ReviewStatus::Rejected)
        {
            match finding.severity {
                Severity::Critical => counts.critical += 1,
                Severity::Major => counts.major += 1,
                Severity::Minor => counts.minor += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreSummary {
    pub mqm_score: f64,
    pub penalty: f64,
    pub counts: SeverityCounts,
    pub segment_count: u32,
}

/// Aggregates a file's findings into a score in `[0, 100]`.
///
/// `mqm = 100 - 100 * penalty / max(segment_count, 1)`, clamped and rounded
/// to two decimals. Pure: no clock, no I/O.
pub fn compute_score(findings: &[Finding], segment_count: u32, weights: &ScoringWeights) -> ScoreSummary {
    score_from_counts(SeverityCounts::from_findings(findings), segment_count, weights)
}

pub fn score_from_counts(counts: SeverityCounts, segment_count: u32, weights: &ScoringWeights) -> ScoreSummary {
    let penalty = weights.critical * f64::from(counts.critical)
        + weights.major * f64::from(counts.major)
        + weights.minor * f64::from(counts.minor);
    let segments = f64::from(segment_count.max(1));
    let raw = 100.0 - 100.0 * penalty / segments;
    let mqm_score = (raw.clamp(0.0, 100.0) * 100.0).round() / 100.0;

    ScoreSummary {
        mqm_score,
        penalty,
        counts,
        segment_count,
    }
}
