//! L2 screening: cheap triage deciding which segments go to deep review.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use super::chain::{ChainPolicy, ModelChain};
use super::prompt::render_segments;
use super::provider::{AiProvider, TierRequest};
use crate::db::screening_repo::ScreeningResult;
use crate::error::PipelineError;
use crate::model::{Category, Layer, NewFinding, Segment, Severity};

/// Rule tag carried by findings produced by this tier.
pub const SCREENING_RULE: &str = "screening";

const SYSTEM_PROMPT: &str = "You are a localization quality triage assistant. \
For each segment decide whether the translation needs a detailed expert review. \
Respond ONLY with valid JSON. Do not include any other text.";

#[derive(Debug, Deserialize)]
struct ScreeningResponse {
    #[serde(default)]
    results: Vec<Verdict>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Verdict {
    segment_id: String,
    escalate: bool,
    #[serde(default)]
    category: Option<String>,
}

/// Decisions for every screened segment plus the findings they imply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScreeningOutput {
    pub results: Vec<ScreeningResult>,
    pub findings: Vec<NewFinding>,
}

impl ScreeningOutput {
    pub fn escalated(&self) -> impl Iterator<Item = &str> {
        self.results
            .iter()
            .filter(|r| r.escalate)
            .map(|r| r.segment_id.as_str())
    }
}

pub struct ScreeningTier {
    provider: Arc<dyn AiProvider>,
    chain: ModelChain,
    policy: ChainPolicy,
    batch_size: usize,
}

impl ScreeningTier {
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

    /// Screens `segments` in chunks. A segment the model does not mention is
    /// treated as not escalated.
    pub async fn screen(&self, segments: &[&Segment]) -> Result<ScreeningOutput, PipelineError> {
        let mut output = ScreeningOutput::default();

        for chunk in segments.chunks(self.batch_size) {
            let request = TierRequest {
                tier: self.chain.tier(),
                system: SYSTEM_PROMPT.to_string(),
                prompt: build_prompt(chunk),
            };
            let verdicts = self
                .chain
                .invoke(self.provider.as_ref(), &request, &self.policy, parse_response)
                .await?;
            merge_chunk(chunk, verdicts, &mut output);
        }

        debug!(
            segments = segments.len(),
            escalated = output.escalated().count(),
            "Screening finished"
        );
        Ok(output)
    }
}

fn build_prompt(chunk: &[&Segment]) -> String {
    format!(
        "Segments:\n{}\n\nReturn JSON:\n{{\"results\": [{{\"segmentId\": \"id\", \"escalate\": true, \"category\": \"accuracy|fluency|terminology|consistency|style|locale_convention|other|null\"}}]}}",
        render_segments(chunk)
    )
}

fn parse_response(raw: &str) -> Result<Vec<Verdict>, String> {
    serde_json::from_str::<ScreeningResponse>(raw)
        .map(|r| r.results)
        .map_err(|e| format!("screening response: {}", e))
}

fn merge_chunk(chunk: &[&Segment], verdicts: Vec<Verdict>, output: &mut ScreeningOutput) {
    let mut by_segment: HashMap<String, Verdict> = HashMap::with_capacity(verdicts.len());
    for verdict in verdicts {
        if !chunk.iter().any(|s| s.id == verdict.segment_id) {
            warn!(segment_id = %verdict.segment_id, "Screening returned an unknown segment, ignoring");
            continue;
        }
        by_segment.entry(verdict.segment_id.clone()).or_insert(verdict);
    }

    for segment in chunk {
        let verdict = by_segment.remove(&segment.id);
        let escalate = verdict.as_ref().map(|v| v.escalate).unwrap_or(false);
        let category = verdict
            .and_then(|v| v.category)
            .filter(|c| !c.trim().is_empty() && c.trim() != "null")
            .map(|c| Category::from_label(&c));

        if escalate {
            if let Some(category) = category {
                output.findings.push(NewFinding {
                    segment_id: Some(segment.id.clone()),
                    layer: Layer::L2,
                    rule: SCREENING_RULE.to_string(),
                    category,
                    severity: Severity::Minor,
                    description: format!("Screening flagged a possible {} issue", category),
                    ambiguous: false,
                });
            }
        }

        output.results.push(ScreeningResult {
            segment_id: segment.id.clone(),
            escalate,
            category,
        });
    }
}
