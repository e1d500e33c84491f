//! Reconciliation of internal findings with an external finding set.

use serde::{Deserialize, Serialize};
use strsim::normalized_levenshtein;

use super::category::normalize_category;
use crate::crossfile::normalize_text;
use crate::model::{Category, Severity};

/// A finding as reported by a third-party QA tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalFinding {
    pub file_name: String,
    /// Segment id or segment number as printed by the tool.
    #[serde(default)]
    pub segment: Option<String>,
    #[serde(default)]
    pub source_text: String,
    #[serde(default)]
    pub target_text: String,
    pub category: String,
    #[serde(default)]
    pub severity: Option<String>,
}

/// An internal finding with the context needed for matching.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalFinding {
    pub finding_id: String,
    pub file_name: String,
    pub segment_id: Option<String>,
    pub segment_number: Option<u32>,
    pub source_text: String,
    pub target_text: String,
    pub category: Category,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Fuzzy,
}

/// An external finding after category normalization.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedExternal {
    #[serde(flatten)]
    pub finding: ExternalFinding,
    pub normalized_category: Category,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParityMatch {
    pub external: NormalizedExternal,
    pub internal: InternalFinding,
    pub match_type: MatchType,
    /// 1.0 for exact matches.
    pub similarity: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParitySummary {
    pub tool_finding_count: usize,
    pub external_finding_count: usize,
    pub both_found_count: usize,
    pub tool_only_count: usize,
    pub external_only_count: usize,
    pub exact_match_count: usize,
    pub fuzzy_match_count: usize,
}

/// Every input finding lands in exactly one bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParityResult {
    pub both_found: Vec<ParityMatch>,
    pub tool_only: Vec<InternalFinding>,
    pub external_only: Vec<NormalizedExternal>,
    pub summary: ParitySummary,
}

pub struct ParityMatcher {
    fuzzy_threshold: f64,
}

impl ParityMatcher {
    pub fn new(fuzzy_threshold: f64) -> Self {
        Self { fuzzy_threshold }
    }

    /// Pairs findings in two passes.
    ///
    /// 1. Exact: same file name and the external segment names the internal
    ///    segment id or number. Among several candidates one with the same
    ///    category is preferred.
    /// 2. Fuzzy: leftover externals against leftover internals by
    ///    (source, target) similarity; the best candidate at or above the
    ///    threshold wins, ties going to the earlier internal finding.
    ///
    /// Each finding is used at most once.
    pub fn reconcile(&self, internal: Vec<InternalFinding>, external: Vec<ExternalFinding>) -> ParityResult {
        let externals: Vec<NormalizedExternal> = external
            .into_iter()
            .map(|finding| NormalizedExternal {
                normalized_category: normalize_category(&finding.category),
                finding,
            })
            .collect();

        let mut internal_used = vec![false; internal.len()];
        // Per external: (internal index, match type, similarity)
        let mut pairs: Vec<Option<(usize, MatchType, f64)>> = vec![None; externals.len()];

        for (ei, ext) in externals.iter().enumerate() {
            if let Some(ii) = exact_candidate(ext, &internal, &internal_used) {
                internal_used[ii] = true;
                pairs[ei] = Some((ii, MatchType::Exact, 1.0));
            }
        }

        for (ei, ext) in externals.iter().enumerate() {
            if pairs[ei].is_some() {
                continue;
            }
            if let Some((ii, similarity)) = self.fuzzy_candidate(ext, &internal, &internal_used) {
                internal_used[ii] = true;
                pairs[ei] = Some((ii, MatchType::Fuzzy, similarity));
            }
        }

        let external_finding_count = externals.len();
        let tool_finding_count = internal.len();

        let mut both_found = Vec::new();
        let mut external_only = Vec::new();
        let mut internal_slots: Vec<Option<InternalFinding>> = internal.into_iter().map(Some).collect();

        for (ext, pair) in externals.into_iter().zip(pairs) {
            match pair.and_then(|(ii, kind, sim)| internal_slots[ii].take().map(|f| (f, kind, sim))) {
                Some((matched, match_type, similarity)) => both_found.push(ParityMatch {
                    external: ext,
                    internal: matched,
                    match_type,
                    similarity,
                }),
                None => external_only.push(ext),
            }
        }
        let tool_only: Vec<InternalFinding> = internal_slots.into_iter().flatten().collect();

        let exact_match_count = both_found
            .iter()
            .filter(|m| m.match_type == MatchType::Exact)
            .count();
        let summary = ParitySummary {
            tool_finding_count,
            external_finding_count,
            both_found_count: both_found.len(),
            tool_only_count: tool_only.len(),
            external_only_count: external_only.len(),
            exact_match_count,
            fuzzy_match_count: both_found.len() - exact_match_count,
        };

        ParityResult {
            both_found,
            tool_only,
            external_only,
            summary,
        }
    }

    fn fuzzy_candidate(
        &self,
        ext: &NormalizedExternal,
        internal: &[InternalFinding],
        used: &[bool],
    ) -> Option<(usize, f64)> {
        let ext_source = normalize_text(&ext.finding.source_text);
        let ext_target = normalize_text(&ext.finding.target_text);
        if ext_source.is_empty() && ext_target.is_empty() {
            return None;
        }

        let mut best: Option<(usize, f64)> = None;
        for (ii, candidate) in internal.iter().enumerate() {
            if used[ii] {
                continue;
            }
            let source = normalize_text(&candidate.source_text);
            let target = normalize_text(&candidate.target_text);
            // File-level findings carry no text to compare.
            if source.is_empty() && target.is_empty() {
                continue;
            }
            let similarity =
                (normalized_levenshtein(&ext_source, &source) + normalized_levenshtein(&ext_target, &target)) / 2.0;
            if similarity >= self.fuzzy_threshold && best.map_or(true, |(_, b)| similarity > b) {
                best = Some((ii, similarity));
            }
        }
        best
    }
}

fn exact_candidate(ext: &NormalizedExternal, internal: &[InternalFinding], used: &[bool]) -> Option<usize> {
    let segment = ext.finding.segment.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
    let file_name = ext.finding.file_name.trim();

    let candidates: Vec<usize> = internal
        .iter()
        .enumerate()
        .filter(|(ii, f)| {
            !used[*ii]
                && f.file_name == file_name
                && (f.segment_id.as_deref() == Some(segment)
                    || f.segment_number.map(|n| n.to_string()).as_deref() == Some(segment))
        })
        .map(|(ii, _)| ii)
        .collect();

    candidates
        .iter()
        .copied()
        .find(|ii| internal[*ii].category == ext.normalized_category)
        .or_else(|| candidates.first().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn internal(id: &str, file: &str, seg: u32, source: &str, target: &str, category: Category) -> InternalFinding {
        InternalFinding {
            finding_id: id.to_string(),
            file_name: file.to_string(),
            segment_id: Some(format!("{}-{}", file, seg)),
            segment_number: Some(seg),
            source_text: source.to_string(),
            target_text: target.to_string(),
            category,
            severity: Severity::Minor,
        }
    }

    fn external(file: &str, seg: Option<&str>, source: &str, target: &str, category: &str) -> ExternalFinding {
        ExternalFinding {
            file_name: file.to_string(),
            segment: seg.map(str::to_string),
            source_text: source.to_string(),
            target_text: target.to_string(),
            category: category.to_string(),
            severity: None,
        }
    }

    #[test]
    fn test_exact_then_fuzzy_then_leftovers() {
        let internals = vec![
            internal("i1", "a.xliff", 1, "Open the file", "Datei öffnen", Category::Fluency),
            internal("i2", "a.xliff", 2, "Close the window now", "Fenster jetzt schliessen", Category::Accuracy),
            internal("i3", "b.xliff", 1, "Unrelated", "Nichts", Category::Style),
        ];
        let externals = vec![
            external("a.xliff", Some("1"), "", "", "Tag Mismatch"),
            external("other.xliff", Some("9"), "Close the window now", "Fenster jetzt schließen", "Omission"),
            external("c.xliff", None, "Completely different", "Ganz anders", "Spelling"),
        ];

        let result = ParityMatcher::new(0.8).reconcile(internals, externals);

        assert_eq!(result.both_found.len(), 2);
        assert_eq!(result.both_found[0].match_type, MatchType::Exact);
        assert_eq!(result.both_found[0].internal.finding_id, "i1");
        assert_eq!(result.both_found[0].external.normalized_category, Category::Fluency);
        assert_eq!(result.both_found[1].match_type, MatchType::Fuzzy);
        assert_eq!(result.both_found[1].internal.finding_id, "i2");
        assert!(result.both_found[1].similarity >= 0.8);
        assert_eq!(result.tool_only.len(), 1);
        assert_eq!(result.tool_only[0].finding_id, "i3");
        assert_eq!(result.external_only.len(), 1);
    }

    #[test]
    fn test_partition_counts_add_up() {
        let internals: Vec<InternalFinding> = (1..=5)
            .map(|i| internal(&format!("i{}", i), "a", i, &format!("src {}", i), &format!("tgt {}", i), Category::Fluency))
            .collect();
        let externals = vec![
            external("a", Some("1"), "", "", "grammar"),
            external("a", Some("1"), "", "", "grammar"),
            external("a", Some("a-3"), "", "", "whatever"),
            external("z", None, "src 4", "tgt 4", "spelling"),
            external("z", None, "", "", "spelling"),
        ];
        let result = ParityMatcher::new(0.8).reconcile(internals, externals);
        let s = result.summary;

        assert_eq!(s.both_found_count + s.tool_only_count, s.tool_finding_count);
        assert_eq!(s.both_found_count + s.external_only_count, s.external_finding_count);
        assert_eq!(s.exact_match_count, 2);
        assert_eq!(s.fuzzy_match_count, 1);
        // The second external on segment 1 finds nothing left to pair with.
        assert_eq!(s.external_only_count, 2);
    }

    #[test]
    fn test_exact_prefers_same_category() {
        let internals = vec![
            internal("i1", "a", 1, "x", "y", Category::Accuracy),
            internal("i2", "a", 1, "x", "y", Category::Fluency),
        ];
        let result = ParityMatcher::new(0.8).reconcile(internals, vec![external("a", Some("1"), "", "", "double space")]);
        assert_eq!(result.both_found[0].internal.finding_id, "i2");
    }

    #[test]
    fn test_threshold_is_respected() {
        let internals = vec![internal("i1", "a", 1, "Hello world", "Hallo Welt", Category::Fluency)];
        let externals = vec![external("a", None, "Goodbye moon", "Tschüss Mond", "spelling")];
        let result = ParityMatcher::new(0.8).reconcile(internals.clone(), externals.clone());
        assert!(result.both_found.is_empty());

        let lenient = ParityMatcher::new(0.01).reconcile(internals, externals);
        assert_eq!(lenient.both_found.len(), 1);
    }
}
