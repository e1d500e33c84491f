//! Runs the analyzer once per completed batch and persists its results.

use std::sync::Arc;

use tracing::{info, warn};

use super::analyzer::{CrossFileAnalyzer, FileSegments};
use crate::collaborators::{GlossaryProvider, SegmentSource};
use crate::db::{batch_repo, cross_file_repo, file_repo, finding_repo, score_repo, Database};
use crate::error::PipelineError;
use crate::model::FileStatus;
use crate::scoring::ScoringService;
use crate::tenant::TenantId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrossFileOutcome {
    /// False when the batch was not complete or had already been analyzed.
    pub ran: bool,
    pub findings: usize,
    pub affected_files: Vec<String>,
}

pub struct CrossFileService {
    db: Database,
    segments: Arc<dyn SegmentSource>,
    glossary: Arc<dyn GlossaryProvider>,
    scoring: Arc<ScoringService>,
    analyzer: CrossFileAnalyzer,
}

impl CrossFileService {
    pub fn new(
        db: Database,
        segments: Arc<dyn SegmentSource>,
        glossary: Arc<dyn GlossaryProvider>,
        scoring: Arc<ScoringService>,
    ) -> Self {
        Self {
            db,
            segments,
            glossary,
            scoring,
            analyzer: CrossFileAnalyzer::new(),
        }
    }

    /// Analyzes a completed batch exactly once.
    ///
    /// Reads happen outside the write transaction. The write transaction
    /// starts by flipping `cross_file_analyzed`; if another run already did,
    /// nothing is written. Scores are never touched directly: affected files
    /// are marked stale and go through the normal debounced recompute.
    pub fn run_for_batch(&self, tenant: &TenantId, batch_id: &str) -> Result<CrossFileOutcome, PipelineError> {
        let (batch, members) = self.db.with_conn(|conn| {
            let batch = batch_repo::get(conn, tenant, batch_id)?;
            let members = file_repo::list_by_batch(conn, tenant, batch_id)?;
            Ok((batch, members))
        })?;

        if !batch.completed || batch.cross_file_analyzed {
            info!(
                batch_id,
                completed = batch.completed,
                analyzed = batch.cross_file_analyzed,
                "Cross-file analysis not applicable"
            );
            return Ok(CrossFileOutcome::default());
        }

        // Files in `error` may never have produced segments.
        let mut files = Vec::with_capacity(members.len());
        for file in members.iter().filter(|f| f.status == FileStatus::Scored) {
            files.push(FileSegments {
                file_id: file.id.clone(),
                segments: self.segments.get_segments(tenant, &file.id)?,
            });
        }
        let glossary_id = batch.glossary_id.as_deref().unwrap_or(&batch.project_id);
        let terms = self.glossary.get_terms(tenant, glossary_id)?;

        let analysis = self.analyzer.analyze(batch_id, &files, &terms);

        let ran = self.db.with_tx(|tx| {
            if !batch_repo::mark_cross_file_analyzed(tx, tenant, batch_id)? {
                return Ok::<_, PipelineError>(false);
            }
            cross_file_repo::insert_many(tx, tenant, batch_id, &analysis.findings)?;
            for (file_id, findings) in &analysis.per_file {
                finding_repo::upsert_many(tx, tenant, file_id, findings)?;
                score_repo::mark_stale(tx, tenant, file_id)?;
            }
            Ok(true)
        })?;

        if !ran {
            info!(batch_id, "Cross-file analysis already recorded by another run");
            return Ok(CrossFileOutcome::default());
        }

        let affected_files: Vec<String> = analysis.affected_files().map(str::to_string).collect();
        for file_id in &affected_files {
            // Stale marks are durable; the sweep covers a failed trigger.
            if let Err(e) = self.scoring.request_recompute(tenant, file_id) {
                warn!(file_id = %file_id, error = %e, "Could not schedule score recompute");
            }
        }

        info!(
            batch_id,
            files = files.len(),
            findings = analysis.findings.len(),
            affected = affected_files.len(),
            "Cross-file analysis finished"
        );
        Ok(CrossFileOutcome {
            ran: true,
            findings: analysis.findings.len(),
            affected_files,
        })
    }
}
