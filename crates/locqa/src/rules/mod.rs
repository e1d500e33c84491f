//! L1 rule engine: deterministic checks over a file's segments.
//!
//! Pure and synchronous. The same segments always produce the same findings
//! in the same order, so re-running the stage is a no-op upsert.

mod checks;

pub use checks::RuleId;

use crate::model::{Layer, NewFinding, Segment};

pub struct RuleEngine {
    patterns: checks::Patterns,
    rules: Vec<RuleId>,
}

impl RuleEngine {
    /// Engine with every rule enabled.
    pub fn new() -> Result<Self, regex::Error> {
        Self::with_rules(&RuleId::ALL)
    }

    pub fn with_rules(rules: &[RuleId]) -> Result<Self, regex::Error> {
        // Keep evaluation order fixed regardless of the caller's order.
        let rules = RuleId::ALL
            .iter()
            .copied()
            .filter(|r| rules.contains(r))
            .collect();
        Ok(Self {
            patterns: checks::Patterns::compile()?,
            rules,
        })
    }

    pub fn check(&self, segments: &[Segment]) -> Vec<NewFinding> {
        let mut findings = Vec::new();
        for segment in segments {
            self.check_segment(segment, &mut findings);
        }
        tracing::debug!(
            segments = segments.len(),
            findings = findings.len(),
            "L1 rules evaluated"
        );
        findings
    }

    fn check_segment(&self, segment: &Segment, out: &mut Vec<NewFinding>) {
        for rule in &self.rules {
            let Some(description) =
                self.patterns
                    .run(*rule, &segment.source_text, &segment.target_text)
            else {
                continue;
            };

            out.push(NewFinding {
                segment_id: Some(segment.id.clone()),
                layer: Layer::L1,
                rule: rule.as_str().to_string(),
                category: rule.category(),
                severity: rule.severity(),
                description,
                ambiguous: rule.is_ambiguous(),
            });

            // Nothing else is meaningful on an empty target.
            if *rule == RuleId::EmptyTarget {
                break;
            }
        }
    }
}
