//! L3 deep review: confirmed, categorized findings for escalated segments.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use super::chain::{ChainPolicy, ModelChain};
use super::prompt::{render_segments, sanitize_for_prompt};
use super::provider::{AiProvider, TierRequest};
use crate::collaborators::CategoryDefinition;
use crate::error::PipelineError;
use crate::model::{Category, Layer, NewFinding, Segment, Severity};

const SYSTEM_PROMPT: &str = "You are an expert localization reviewer. \
Report only real translation errors, each with a category, a severity and a short description. \
Respond ONLY with valid JSON. Do not include any other text.";

#[derive(Debug, Deserialize)]
struct ReviewResponse {
    #[serde(default)]
    findings: Vec<ReviewedIssue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewedIssue {
    segment_id: String,
    category: String,
    severity: String,
    description: String,
}

pub struct DeepReviewTier {
    provider: Arc<dyn AiProvider>,
    chain: ModelChain,
    policy: ChainPolicy,
    batch_size: usize,
}

impl DeepReviewTier {
    pub fn new(
        provider: Arc<dyn AiProvider>,
        chain: ModelChain,
        policy: ChainPolicy,
        batch_size: usize,
    ) -> Self {
        Self {
            provider,
            chain,
            policy,
            batch_size: batch_size.max(1),
        }
    }

    /// Reviews escalated segments against the tenant's active categories.
    ///
    /// Categories outside `active` are reported as `other`. Issues naming an
    /// unknown segment or severity are dropped.
    pub async fn review(
        &self,
        segments: &[&Segment],
        active: &[CategoryDefinition],
    ) -> Result<Vec<NewFinding>, PipelineError> {
        let mut findings = Vec::new();
        let mut seen: HashSet<(String, Category)> = HashSet::new();

        for chunk in segments.chunks(self.batch_size) {
            let request = TierRequest {
                tier: self.chain.tier(),
                system: SYSTEM_PROMPT.to_string(),
                prompt: build_prompt(chunk, active),
            };
            let issues = self
                .chain
                .invoke(self.provider.as_ref(), &request, &self.policy, parse_response)
                .await?;

            for issue in issues {
                let Some(finding) = to_finding(issue, chunk, active) else {
                    continue;
                };
                let key = (finding.segment_id.clone().unwrap_or_default(), finding.category);
                if seen.insert(key) {
                    findings.push(finding);
                }
            }
        }

        debug!(
            segments = segments.len(),
            findings = findings.len(),
            "Deep review finished"
        );
        Ok(findings)
    }
}

fn build_prompt(chunk: &[&Segment], active: &[CategoryDefinition]) -> String {
    let categories: Vec<String> = active
        .iter()
        .map(|c| format!("- {} ({})", c.category, sanitize_for_prompt(&c.label)))
        .collect();
    format!(
        "Allowed categories:\n{}\n\nSegments:\n{}\n\nReturn JSON:\n{{\"findings\": [{{\"segmentId\": \"id\", \"category\": \"one of the allowed categories\", \"severity\": \"critical|major|minor\", \"description\": \"what is wrong\"}}]}}",
        categories.join("\n"),
        render_segments(chunk)
    )
}

fn parse_response(raw: &str) -> Result<Vec<ReviewedIssue>, String> {
    serde_json::from_str::<ReviewResponse>(raw)
        .map(|r| r.findings)
        .map_err(|e| format!("deep review response: {}", e))
}

fn to_finding(
    issue: ReviewedIssue,
    chunk: &[&Segment],
    active: &[CategoryDefinition],
) -> Option<NewFinding> {
    if !chunk.iter().any(|s| s.id == issue.segment_id) {
        warn!(segment_id = %issue.segment_id, "Deep review returned an unknown segment, ignoring");
        return None;
    }
    let severity = match issue.severity.parse::<Severity>() {
        Ok(severity) => severity,
        Err(e) => {
            warn!(segment_id = %issue.segment_id, error = %e, "Deep review returned an unknown severity, ignoring");
            return None;
        }
    };

    let category = Category::from_label(&issue.category);
    let category = if active.iter().any(|c| c.category == category) {
        category
    } else {
        Category::Other
    };

    Some(NewFinding {
        segment_id: Some(issue.segment_id),
        layer: Layer::L3,
        rule: category.as_str().to_string(),
        category,
        severity,
        description: issue.description.trim().to_string(),
        ambiguous: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::model::{AiTier, ModelId};
    use crate::ai::provider::AiError;
    use async_trait::async_trait;

    struct Canned(String);

    #[async_trait]
    impl AiProvider for Canned {
        async fn invoke(&self, _model: ModelId, _request: &TierRequest) -> Result<String, AiError> {
            Ok(self.0.clone())
        }
    }

    fn active() -> Vec<CategoryDefinition> {
        [Category::Accuracy, Category::Terminology]
            .iter()
            .map(|c| CategoryDefinition {
                category: *c,
                label: c.as_str().to_string(),
            })
            .collect()
    }

    fn tier(answer: &str) -> DeepReviewTier {
        let chain = ModelChain::new(AiTier::DeepReview, vec![ModelId::ClaudeSonnet4]).unwrap();
        DeepReviewTier::new(
            Arc::new(Canned(answer.to_string())),
            chain,
            ChainPolicy::default(),
            20,
        )
    }

    #[tokio::test]
    async fn test_review_maps_categories_and_drops_invalid() {
        let answer = r#"{"findings": [
            {"segmentId": "s1", "category": "Accuracy", "severity": "Critical", "description": "Meaning inverted"},
            {"segmentId": "s1", "category": "accuracy", "severity": "minor", "description": "Duplicate"},
            {"segmentId": "s2", "category": "Style", "severity": "minor", "description": "Awkward"},
            {"segmentId": "s2", "category": "terminology", "severity": "blocker", "description": "Bad severity"},
            {"segmentId": "zz", "category": "accuracy", "severity": "major", "description": "Unknown"}
        ]}"#;
        let segments = vec![
            Segment::new("s1", "f1", 1, "Do not delete", "Löschen"),
            Segment::new("s2", "f1", 2, "Hello", "Hallöchen"),
        ];
        let refs: Vec<&Segment> = segments.iter().collect();

        let findings = tier(answer).review(&refs, &active()).await.unwrap();

        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].category, Category::Accuracy);
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings[0].rule, "accuracy");
        // Style is not an active category for this tenant.
        assert_eq!(findings[1].category, Category::Other);
        assert!(findings.iter().all(|f| f.layer == Layer::L3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_review_malformed_everywhere_is_transient() {
        let segments = vec![Segment::new("s1", "f1", 1, "a", "b")];
        let refs: Vec<&Segment> = segments.iter().collect();
        let err = tier("I cannot help with that").review(&refs, &active()).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
