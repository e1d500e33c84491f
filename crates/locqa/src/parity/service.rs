//! Parity report for one batch against an external QA report.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::matcher::{ExternalFinding, InternalFinding, ParityMatcher, ParityResult};
use crate::collaborators::{CollaboratorError, SegmentSource};
use crate::db::{batch_repo, file_repo, finding_repo, Database};
use crate::error::PipelineError;
use crate::model::{ReviewStatus, Segment};
use crate::tenant::TenantId;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParityReport {
    pub tenant_id: TenantId,
    pub batch_id: String,
    pub generated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub result: ParityResult,
}

pub struct ParityService {
    db: Database,
    segments: Arc<dyn SegmentSource>,
    matcher: ParityMatcher,
}

impl ParityService {
    pub fn new(db: Database, segments: Arc<dyn SegmentSource>, fuzzy_threshold: f64) -> Self {
        Self {
            db,
            segments,
            matcher: ParityMatcher::new(fuzzy_threshold),
        }
    }

    /// Compares the batch's findings with `external`.
    ///
    /// Rejected findings are not part of the tool's finding set. Read-only.
    pub fn compare(
        &self,
        tenant: &TenantId,
        batch_id: &str,
        external: Vec<ExternalFinding>,
    ) -> Result<ParityReport, PipelineError> {
        let (files, findings) = self.db.with_conn(|conn| {
            batch_repo::get(conn, tenant, batch_id)?;
            Ok((
                file_repo::list_by_batch(conn, tenant, batch_id)?,
                finding_repo::list_by_batch(conn, tenant, batch_id)?,
            ))
        })?;

        let mut names: HashMap<&str, &str> = HashMap::with_capacity(files.len());
        let mut loaded: Vec<(String, Vec<Segment>)> = Vec::with_capacity(files.len());
        for file in &files {
            names.insert(&file.id, &file.file_name);
            match self.segments.get_segments(tenant, &file.id) {
                Ok(list) => loaded.push((file.id.clone(), list)),
                // A file that failed before parsing has no segments to show.
                Err(CollaboratorError::NotFound { .. }) => {
                    warn!(file_id = %file.id, "No segments for file, matching without text")
                }
                Err(e) => return Err(e.into()),
            }
        }
        let mut segments: HashMap<(&str, &str), Segment> = HashMap::new();
        for (file_id, list) in &loaded {
            for segment in list {
                segments.insert((file_id.as_str(), segment.id.as_str()), segment.clone());
            }
        }

        let internal: Vec<InternalFinding> = findings
            .into_iter()
            .filter(|f| f.review_status != ReviewStatus::Rejected)
            .map(|f| {
                let segment = f
                    .segment_id
                    .as_deref()
                    .and_then(|sid| segments.get(&(f.file_id.as_str(), sid)));
                InternalFinding {
                    file_name: names.get(f.file_id.as_str()).copied().unwrap_or_default().to_string(),
                    segment_number: segment.map(|s| s.segment_number),
                    source_text: segment.map(|s| s.source_text.clone()).unwrap_or_default(),
                    target_text: segment.map(|s| s.target_text.clone()).unwrap_or_default(),
                    finding_id: f.id,
                    segment_id: f.segment_id,
                    category: f.category,
                    severity: f.severity,
                }
            })
            .collect();

        let result = self.matcher.reconcile(internal, external);
        info!(
            batch_id,
            both_found = result.summary.both_found_count,
            tool_only = result.summary.tool_only_count,
            external_only = result.summary.external_only_count,
            "Parity comparison finished"
        );

        Ok(ParityReport {
            tenant_id: tenant.clone(),
            batch_id: batch_id.to_string(),
            generated_at: Utc::now(),
            result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::memory::InMemorySegmentSource;
    use crate::db::batch_repo::NewBatch;
    use crate::model::{Category, Layer, NewFile, NewFinding, ProcessingMode, Severity};

    fn tenant() -> TenantId {
        TenantId::new("t1").unwrap()
    }

    #[test]
    fn test_compare_builds_report() {
        let db = Database::open_in_memory().unwrap();
        let source = Arc::new(InMemorySegmentSource::new());
        source.insert(
            &tenant(),
            "f1",
            vec![
                Segment::new("s1", "f1", 1, "Open <b>file</b>", "Datei öffnen"),
                Segment::new("s2", "f1", 2, "Save", "Speichern"),
            ],
        );
        db.with_conn(|conn| {
            batch_repo::insert_if_absent(
                conn,
                &NewBatch {
                    id: "b1".into(),
                    tenant_id: tenant(),
                    project_id: "p1".into(),
                    mode: ProcessingMode::Economy,
                    glossary_id: None,
                },
            )?;
            file_repo::insert_if_absent(
                conn,
                &NewFile {
                    id: "f1".into(),
                    tenant_id: tenant(),
                    project_id: "p1".into(),
                    file_name: "manual.xliff".into(),
                    mode: ProcessingMode::Economy,
                },
            )?;
            file_repo::assign_batch(conn, &tenant(), "f1", "b1")?;
            finding_repo::upsert_many(
                conn,
                &tenant(),
                "f1",
                &[
                    NewFinding {
                        segment_id: Some("s1".into()),
                        layer: Layer::L1,
                        rule: "tag_mismatch".into(),
                        category: Category::Fluency,
                        severity: Severity::Major,
                        description: "Tags differ".into(),
                        ambiguous: false,
                    },
                    NewFinding {
                        segment_id: Some("s2".into()),
                        layer: Layer::L1,
                        rule: "untranslated".into(),
                        category: Category::Accuracy,
                        severity: Severity::Major,
                        description: "x".into(),
                        ambiguous: true,
                    },
                ],
            )?;
            Ok(())
        })
        .unwrap();

        let service = ParityService::new(db, source, 0.8);
        let external = vec![
            ExternalFinding {
                file_name: "manual.xliff".into(),
                segment: Some("1".into()),
                source_text: String::new(),
                target_text: String::new(),
                category: "Tag Mismatch".into(),
                severity: Some("major".into()),
            },
            ExternalFinding {
                file_name: "manual.xliff".into(),
                segment: None,
                source_text: "Something else".into(),
                target_text: "Etwas anderes".into(),
                category: "Spelling".into(),
                severity: None,
            },
        ];

        let report = service.compare(&tenant(), "b1", external).unwrap();
        let s = report.result.summary;
        assert_eq!(s.tool_finding_count, 2);
        assert_eq!(s.both_found_count, 1);
        assert_eq!(s.tool_only_count, 1);
        assert_eq!(s.external_only_count, 1);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["batchId"], "b1");
        assert_eq!(json["bothFound"][0]["matchType"], "exact");
        assert_eq!(json["summary"]["bothFoundCount"], 1);
    }

    #[test]
    fn test_unknown_batch_is_validation_error() {
        let db = Database::open_in_memory().unwrap();
        let service = ParityService::new(db, Arc::new(InMemorySegmentSource::new()), 0.8);
        let err = service.compare(&tenant(), "nope", vec![]).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }
}
