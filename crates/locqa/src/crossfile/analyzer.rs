//! Pure cross-file consistency analysis over a batch's segments.

use std::collections::{BTreeMap, BTreeSet};

use crate::collaborators::GlossaryTerm;
use crate::db::cross_file_repo::NewCrossFileFinding;
use crate::model::{dedup_key, Category, CrossFileKind, Layer, NewFinding, Segment, Severity};

/// Segments of one member file.
#[derive(Debug, Clone)]
pub struct FileSegments {
    pub file_id: String,
    pub segments: Vec<Segment>,
}

/// Batch-level findings plus the per-file findings they imply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrossFileAnalysis {
    pub findings: Vec<NewCrossFileFinding>,
    /// Keyed by file id; every key is an affected file.
    pub per_file: BTreeMap<String, Vec<NewFinding>>,
}

impl CrossFileAnalysis {
    pub fn affected_files(&self) -> impl Iterator<Item = &str> {
        self.per_file.keys().map(String::as_str)
    }
}

/// Trim, lowercase and collapse inner whitespace.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Default)]
pub struct CrossFileAnalyzer;

impl CrossFileAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Finds inconsistent translations and glossary violations across files.
    ///
    /// Output order depends only on the input, so re-running over the same
    /// batch yields the same dedup keys.
    pub fn analyze(&self, batch_id: &str, files: &[FileSegments], terms: &[GlossaryTerm]) -> CrossFileAnalysis {
        let mut analysis = CrossFileAnalysis::default();
        self.inconsistent_translations(batch_id, files, &mut analysis);
        self.terminology(batch_id, files, terms, &mut analysis);
        analysis
    }

    fn inconsistent_translations(&self, batch_id: &str, files: &[FileSegments], out: &mut CrossFileAnalysis) {
        // normalized source -> (file id, segment) occurrences
        let mut groups: BTreeMap<String, Vec<(&str, &Segment)>> = BTreeMap::new();
        for file in files {
            for segment in &file.segments {
                let source = normalize_text(&segment.source_text);
                if source.is_empty() || segment.target_text.trim().is_empty() {
                    continue;
                }
                groups.entry(source).or_default().push((file.file_id.as_str(), segment));
            }
        }

        for (source, members) in groups {
            let targets: BTreeSet<String> = members
                .iter()
                .map(|(_, s)| normalize_text(&s.target_text))
                .collect();
            if targets.len() < 2 {
                continue;
            }

            let kind = CrossFileKind::InconsistentTranslation;
            let description = format!(
                "Source translated {} different ways across the batch",
                targets.len()
            );
            out.findings.push(NewCrossFileFinding {
                kind,
                source_text: members[0].1.source_text.trim().to_string(),
                description: description.clone(),
                file_ids: unique_files(&members),
                segment_ids: members.iter().map(|(_, s)| s.id.clone()).collect(),
                dedup_key: dedup_key(batch_id, Layer::CrossFile, kind.as_str(), Some(&source)),
            });

            for (file_id, segment) in &members {
                out.per_file
                    .entry(file_id.to_string())
                    .or_default()
                    .push(NewFinding {
                        segment_id: Some(segment.id.clone()),
                        layer: Layer::CrossFile,
                        rule: kind.as_str().to_string(),
                        category: Category::Consistency,
                        severity: Severity::Minor,
                        description: description.clone(),
                        ambiguous: false,
                    });
            }
        }
    }

    /// Glossary violations for terms used in at least two member files.
    ///
    /// A term whose source occurs in a single file is a per-file concern and
    /// is left to the per-file tiers.
    fn terminology(
        &self,
        batch_id: &str,
        files: &[FileSegments],
        terms: &[GlossaryTerm],
        out: &mut CrossFileAnalysis,
    ) {
        for term in terms {
            if term.source_term.trim().is_empty() || term.target_term.trim().is_empty() {
                continue;
            }

            let mut using_files = 0usize;
            let mut violations: Vec<(&str, &Segment)> = Vec::new();
            for file in files {
                let mut uses_term = false;
                for segment in &file.segments {
                    if !contains_term(&segment.source_text, &term.source_term, term.case_sensitive) {
                        continue;
                    }
                    uses_term = true;
                    if !contains_term(&segment.target_text, &term.target_term, term.case_sensitive) {
                        violations.push((file.file_id.as_str(), segment));
                    }
                }
                if uses_term {
                    using_files += 1;
                }
            }
            if using_files < 2 || violations.is_empty() {
                continue;
            }

            let kind = CrossFileKind::TerminologyMismatch;
            let term_key = normalize_text(&term.source_term);
            let description = format!(
                "Glossary term '{}' should be translated as '{}'",
                term.source_term, term.target_term
            );
            out.findings.push(NewCrossFileFinding {
                kind,
                source_text: term.source_term.clone(),
                description: description.clone(),
                file_ids: unique_files(&violations),
                segment_ids: violations.iter().map(|(_, s)| s.id.clone()).collect(),
                dedup_key: dedup_key(batch_id, Layer::CrossFile, kind.as_str(), Some(&term_key)),
            });

            // One rule per term so several terms in a segment stay distinct.
            let rule = format!("{}:{}", kind.as_str(), term_key);
            for (file_id, segment) in &violations {
                out.per_file
                    .entry(file_id.to_string())
                    .or_default()
                    .push(NewFinding {
                        segment_id: Some(segment.id.clone()),
                        layer: Layer::CrossFile,
                        rule: rule.clone(),
                        category: Category::Terminology,
                        severity: Severity::Major,
                        description: description.clone(),
                        ambiguous: false,
                    });
            }
        }
    }
}

fn unique_files(members: &[(&str, &Segment)]) -> Vec<String> {
    members
        .iter()
        .map(|(f, _)| f.to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn contains_term(text: &str, term: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        text.contains(term.trim())
    } else {
        text.to_lowercase().contains(&term.trim().to_lowercase())
    }
}
