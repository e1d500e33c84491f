//! Stage orchestration.
//!
//! A file moves through the stages of its processing mode one durable task at
//! a time. Every task is keyed by `(file id, stage)`; running one twice is
//! harmless because its writes are upserts keyed by the finding dedup key and
//! its status change is a conditional update. The follow-up stage is enqueued
//! in the same transaction as the status change, so the next stage can only
//! start after the previous one has committed.

pub mod batch_tracker;
pub mod retry;
pub mod worker;

pub use batch_tracker::BatchTracker;
pub use retry::RetryPolicy;
pub use worker::{spawn_event_listener, WorkerPool};

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::ai::{AiProvider, DeepReviewTier, ScreeningTier};
use crate::collaborators::{AuditWriter, GlossaryProvider, SegmentSource};
use crate::config::{Config, L2Scope};
use crate::crossfile::CrossFileService;
use crate::db::audit_repo::AuditEntry;
use crate::db::batch_repo::{self, NewBatch};
use crate::db::task_repo::{self, Task, TaskKind};
use crate::db::{cross_tenant, file_repo, finding_repo, score_repo, screening_repo, Database, DatabaseError};
use crate::error::{AuditError, ConfigError, PipelineError};
use crate::events::{EventBus, PipelineEvent};
use crate::model::{
    validate_segments, FileStatus, Finding, NewFile, QaFile, ReviewStatus, Segment, Stage,
};
use crate::rules::RuleEngine;
use crate::scoring::ScoringService;
use crate::tenant::TenantId;

const SYSTEM_ACTOR: &str = "system";

/// Everything the orchestrator drives. Built once per process.
pub struct OrchestratorDeps {
    pub db: Database,
    pub segments: Arc<dyn SegmentSource>,
    pub glossary: Arc<dyn GlossaryProvider>,
    pub audit: Arc<dyn AuditWriter>,
    pub rules: RuleEngine,
    pub screening: ScreeningTier,
    pub deep_review: DeepReviewTier,
    pub scoring: Arc<ScoringService>,
    pub cross_file: CrossFileService,
    pub events: EventBus,
    pub retry: RetryPolicy,
    pub l2_scope: L2Scope,
}

/// Result of one [`Orchestrator::advance`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// The stage ran and the file moved to `status`.
    Advanced { status: FileStatus, next: Option<Stage> },
    /// The file was already at or past this stage. Nothing was written.
    AlreadyDone { status: FileStatus },
    /// The stage does not apply: the file failed, the mode skips the stage,
    /// or the previous stage has not committed yet.
    Skipped { status: FileStatus },
}

impl AdvanceOutcome {
    pub fn status(&self) -> FileStatus {
        match self {
            AdvanceOutcome::Advanced { status, .. }
            | AdvanceOutcome::AlreadyDone { status }
            | AdvanceOutcome::Skipped { status } => *status,
        }
    }
}

pub struct Orchestrator {
    db: Database,
    segments: Arc<dyn SegmentSource>,
    glossary: Arc<dyn GlossaryProvider>,
    audit: Arc<dyn AuditWriter>,
    rules: RuleEngine,
    screening: ScreeningTier,
    deep_review: DeepReviewTier,
    scoring: Arc<ScoringService>,
    cross_file: Arc<CrossFileService>,
    tracker: BatchTracker,
    retry: RetryPolicy,
    l2_scope: L2Scope,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps) -> Self {
        Self {
            tracker: BatchTracker::new(deps.db.clone(), deps.events),
            db: deps.db,
            segments: deps.segments,
            glossary: deps.glossary,
            audit: deps.audit,
            rules: deps.rules,
            screening: deps.screening,
            deep_review: deps.deep_review,
            scoring: deps.scoring,
            cross_file: Arc::new(deps.cross_file),
            retry: deps.retry,
            l2_scope: deps.l2_scope,
        }
    }

    /// Production constructor: builds every component from `config`.
    pub fn from_config(
        config: &Config,
        db: Database,
        provider: Arc<dyn AiProvider>,
        segments: Arc<dyn SegmentSource>,
        glossary: Arc<dyn GlossaryProvider>,
        audit: Arc<dyn AuditWriter>,
        events: EventBus,
    ) -> Result<Self, ConfigError> {
        let rules = RuleEngine::new().map_err(|e| ConfigError::Validation {
            message: format!("Invalid built-in rule pattern: {}", e),
        })?;
        let policy = config.ai.chain_policy();
        let screening = ScreeningTier::new(
            provider.clone(),
            config.ai.screening()?,
            policy,
            config.ai.screening_batch_size,
        );
        let deep_review = DeepReviewTier::new(
            provider,
            config.ai.deep_review()?,
            policy,
            config.ai.deep_review_batch_size,
        );
        let scoring = Arc::new(ScoringService::from_config(db.clone(), &config.scoring));
        let cross_file = CrossFileService::new(
            db.clone(),
            segments.clone(),
            glossary.clone(),
            scoring.clone(),
        );

        Ok(Self::new(OrchestratorDeps {
            db,
            segments,
            glossary,
            audit,
            rules,
            screening,
            deep_review,
            scoring,
            cross_file,
            events,
            retry: RetryPolicy::from_config(&config.retry),
            l2_scope: config.ai.l2_scope,
        }))
    }

    pub fn scoring(&self) -> &Arc<ScoringService> {
        &self.scoring
    }

    pub fn tracker(&self) -> &BatchTracker {
        &self.tracker
    }

    /// Registers an uploaded file. Returns false if it was already known.
    pub fn register_file(&self, file: &NewFile) -> Result<bool, PipelineError> {
        Ok(self.db.with_conn(|conn| file_repo::insert_if_absent(conn, file))?)
    }

    /// Registers a batch ahead of its `batch-started` signal, e.g. to attach
    /// a glossary. Returns false if it was already known.
    pub fn register_batch(&self, batch: &NewBatch) -> Result<bool, PipelineError> {
        Ok(self.db.with_conn(|conn| batch_repo::insert_if_absent(conn, batch))?)
    }

    /// Queued or running tasks across all tenants.
    pub fn pending_tasks(&self) -> Result<u64, PipelineError> {
        Ok(self.db.with_conn(cross_tenant::count_pending)?)
    }

    /// Applies an inbound event. Duplicate delivery is harmless.
    pub fn handle_event(&self, event: &PipelineEvent) -> Result<(), PipelineError> {
        match event {
            PipelineEvent::ProcessFile {
                file_id,
                project_id,
                tenant_id,
                mode,
                batch_id,
                user_id,
            } => {
                self.audit.write(&AuditEntry {
                    tenant_id: tenant_id.clone(),
                    actor: user_id.clone(),
                    action: "file.process_requested".to_string(),
                    entity_type: "file".to_string(),
                    entity_id: file_id.clone(),
                    details: json!({
                        "projectId": project_id,
                        "mode": mode.as_str(),
                        "batchId": batch_id,
                    }),
                })?;

                let queued = self.db.with_tx(|tx| {
                    let file = file_repo::get(tx, tenant_id, file_id)?;
                    check_project(&file, project_id)?;
                    file_repo::set_mode_if_uploaded(tx, tenant_id, file_id, *mode)?;
                    if let Some(batch_id) = batch_id {
                        batch_repo::get(tx, tenant_id, batch_id)?;
                        attach_to_batch(tx, tenant_id, file_id, batch_id)?;
                    }
                    Ok::<_, PipelineError>(task_repo::enqueue_stage(tx, tenant_id, file_id, Stage::Parse)?)
                })?;
                info!(tenant = %tenant_id, file_id = %file_id, mode = mode.as_str(), queued, "File accepted");
                // A file that was already terminal enqueues nothing.
                if let Some(batch_id) = batch_id {
                    self.tracker.evaluate(tenant_id, batch_id)?;
                }
            }
            PipelineEvent::BatchStarted {
                batch_id,
                project_id,
                tenant_id,
                file_ids,
                mode,
            } => {
                if file_ids.is_empty() {
                    return Err(PipelineError::Validation(format!(
                        "batch '{}' has no files",
                        batch_id
                    )));
                }
                self.audit.write(&AuditEntry {
                    tenant_id: tenant_id.clone(),
                    actor: SYSTEM_ACTOR.to_string(),
                    action: "batch.started".to_string(),
                    entity_type: "batch".to_string(),
                    entity_id: batch_id.clone(),
                    details: json!({ "projectId": project_id, "files": file_ids.len(), "mode": mode.as_str() }),
                })?;

                let queued = self.db.with_tx(|tx| -> Result<usize, PipelineError> {
                    batch_repo::insert_if_absent(
                        tx,
                        &NewBatch {
                            id: batch_id.clone(),
                            tenant_id: tenant_id.clone(),
                            project_id: project_id.clone(),
                            mode: *mode,
                            glossary_id: None,
                        },
                    )?;
                    let batch = batch_repo::get(tx, tenant_id, batch_id)?;
                    if batch.project_id != *project_id {
                        return Err(PipelineError::Validation(format!(
                            "batch '{}' belongs to project '{}'",
                            batch_id, batch.project_id
                        )));
                    }

                    let mut queued = 0usize;
                    for file_id in file_ids {
                        let file = file_repo::get(tx, tenant_id, file_id)?;
                        check_project(&file, project_id)?;
                        file_repo::set_mode_if_uploaded(tx, tenant_id, file_id, *mode)?;
                        attach_to_batch(tx, tenant_id, file_id, batch_id)?;
                        if task_repo::enqueue_stage(tx, tenant_id, file_id, Stage::Parse)? {
                            queued += 1;
                        }
                    }
                    Ok(queued)
                })?;
                info!(tenant = %tenant_id, batch_id = %batch_id, files = file_ids.len(), queued, "Batch started");
                // Members that were already terminal produce no stage task.
                self.tracker.evaluate(tenant_id, batch_id)?;
            }
            PipelineEvent::BatchCompleted {
                batch_id, tenant_id, ..
            } => {
                // The guard already enqueued the pass; this covers an external producer.
                let queued = self
                    .db
                    .with_conn(|conn| task_repo::enqueue_cross_file(conn, tenant_id, batch_id))?;
                debug!(tenant = %tenant_id, batch_id = %batch_id, queued, "Batch completion received");
            }
        }
        Ok(())
    }

    /// Runs `stage` for a file. Safe to call repeatedly for the same key.
    pub async fn advance(
        &self,
        tenant: &TenantId,
        file_id: &str,
        stage: Stage,
    ) -> Result<AdvanceOutcome, PipelineError> {
        let file = self.db.with_conn(|conn| file_repo::get(conn, tenant, file_id))?;
        if let Some(outcome) = self.precheck(tenant, &file, stage)? {
            return Ok(outcome);
        }

        match stage {
            Stage::Parse => self.run_parse(tenant, &file),
            Stage::L1 => self.run_rules(tenant, &file),
            Stage::L2 => self.run_screening(tenant, &file).await,
            Stage::L3 => self.run_deep_review(tenant, &file).await,
            Stage::Score => self.run_score(tenant, &file),
        }
    }

    fn precheck(
        &self,
        tenant: &TenantId,
        file: &QaFile,
        stage: Stage,
    ) -> Result<Option<AdvanceOutcome>, PipelineError> {
        let status = file.status;
        if status == FileStatus::Error || !file.mode.includes(stage) {
            return Ok(Some(AdvanceOutcome::Skipped { status }));
        }
        if status.has_completed(stage) {
            // The committing run may have died before its task was closed
            if let Some(next) = file.mode.next_stage(stage) {
                self.db
                    .with_conn(|conn| task_repo::enqueue_stage(conn, tenant, &file.id, next))?;
            }
            return Ok(Some(AdvanceOutcome::AlreadyDone { status }));
        }
        if !file.mode.entry_statuses(stage).contains(&status) {
            warn!(file_id = %file.id, status = %status, stage = stage.as_str(), "Stage requested out of order");
            return Ok(Some(AdvanceOutcome::Skipped { status }));
        }
        Ok(None)
    }

    fn run_parse(&self, tenant: &TenantId, file: &QaFile) -> Result<AdvanceOutcome, PipelineError> {
        self.db.with_conn(|conn| {
            file_repo::transition(conn, tenant, &file.id, &[FileStatus::Uploaded], FileStatus::Parsing)
        })?;

        let segments = self.segments.get_segments(tenant, &file.id)?;
        validate_segments(&file.id, &segments).map_err(PipelineError::Validation)?;
        let count = u32::try_from(segments.len())
            .map_err(|_| PipelineError::Validation(format!("file '{}' has too many segments", file.id)))?;

        let outcome = self.commit(tenant, file, Stage::Parse, |conn| {
            file_repo::set_segment_count(conn, tenant, &file.id, count)
        })?;
        info!(segments = count, "Segments recorded");
        Ok(outcome)
    }

    fn run_rules(&self, tenant: &TenantId, file: &QaFile) -> Result<AdvanceOutcome, PipelineError> {
        let segments = self.segments.get_segments(tenant, &file.id)?;
        let findings = self.rules.check(&segments);

        let outcome = self.commit(tenant, file, Stage::L1, |conn| {
            finding_repo::upsert_many(conn, tenant, &file.id, &findings).map(|_| ())
        })?;
        info!(findings = findings.len(), "L1 findings stored");
        Ok(outcome)
    }

    async fn run_screening(&self, tenant: &TenantId, file: &QaFile) -> Result<AdvanceOutcome, PipelineError> {
        let segments = self.segments.get_segments(tenant, &file.id)?;
        let scoped: Vec<&Segment> = match self.l2_scope {
            L2Scope::All => segments.iter().collect(),
            L2Scope::L1Flagged => {
                let flagged: HashSet<String> = self
                    .db
                    .with_conn(|conn| finding_repo::ambiguous_segment_ids(conn, tenant, &file.id))?
                    .into_iter()
                    .collect();
                segments.iter().filter(|s| flagged.contains(&s.id)).collect()
            }
        };

        let output = self.screening.screen(&scoped).await?;
        let escalated = output.escalated().count();

        let outcome = self.commit(tenant, file, Stage::L2, |conn| {
            screening_repo::upsert_many(conn, tenant, &file.id, &output.results)?;
            finding_repo::upsert_many(conn, tenant, &file.id, &output.findings)?;
            Ok(())
        })?;
        info!(screened = scoped.len(), escalated, "Screening stored");
        Ok(outcome)
    }

    async fn run_deep_review(&self, tenant: &TenantId, file: &QaFile) -> Result<AdvanceOutcome, PipelineError> {
        let escalated: HashSet<String> = self
            .db
            .with_conn(|conn| screening_repo::escalated_segment_ids(conn, tenant, &file.id))?
            .into_iter()
            .collect();

        let findings = if escalated.is_empty() {
            Vec::new()
        } else {
            let segments = self.segments.get_segments(tenant, &file.id)?;
            let targets: Vec<&Segment> = segments.iter().filter(|s| escalated.contains(&s.id)).collect();
            let active = self.glossary.get_active_categories(tenant)?;
            self.deep_review.review(&targets, &active).await?
        };

        let outcome = self.commit(tenant, file, Stage::L3, |conn| {
            finding_repo::upsert_many(conn, tenant, &file.id, &findings).map(|_| ())
        })?;
        info!(escalated = escalated.len(), findings = findings.len(), "L3 findings stored");
        Ok(outcome)
    }

    fn run_score(&self, tenant: &TenantId, file: &QaFile) -> Result<AdvanceOutcome, PipelineError> {
        let recomputer = self.scoring.recomputer();
        self.commit(tenant, file, Stage::Score, |conn| {
            recomputer.recompute_in(conn, tenant, &file.id).map(|_| ())
        })
    }

    /// Applies a stage's writes, its status change and the follow-up enqueue
    /// in one transaction.
    fn commit<F>(
        &self,
        tenant: &TenantId,
        file: &QaFile,
        stage: Stage,
        write: F,
    ) -> Result<AdvanceOutcome, PipelineError>
    where
        F: FnOnce(&Connection) -> Result<(), DatabaseError>,
    {
        let to = stage.completed_status();
        let next = file.mode.next_stage(stage);
        let mut from = file.mode.entry_statuses(stage);
        if stage == Stage::Parse {
            from = vec![FileStatus::Parsing];
        }

        self.db.with_tx(|tx| {
            write(tx)?;
            if !file_repo::transition(tx, tenant, &file.id, &from, to)? {
                // A concurrent run of the same key got there first
                let current = file_repo::get(tx, tenant, &file.id)?;
                return Ok(AdvanceOutcome::AlreadyDone {
                    status: current.status,
                });
            }
            if let Some(next) = next {
                task_repo::enqueue_stage(tx, tenant, &file.id, next)?;
            }
            Ok(AdvanceOutcome::Advanced { status: to, next })
        })
    }

    /// Claims and runs one due task. Returns false when the queue is idle.
    ///
    /// The claim and the cross-file pass run on the blocking pool. Stage
    /// commits are single short transactions and run inline between the
    /// awaited provider calls.
    pub async fn run_next_task(&self) -> Result<bool, PipelineError> {
        let db = self.db.clone();
        let claimed = tokio::task::spawn_blocking(move || {
            db.with_conn(|conn| cross_tenant::claim_next(conn, Utc::now()))
        })
        .await
        .map_err(|e| PipelineError::Fatal(format!("task claim panicked: {}", e)))?;
        let Some(task) = claimed? else {
            return Ok(false);
        };
        debug!(
            task_id = %task.id,
            kind = task.kind.as_str(),
            subject = %task.subject_id,
            attempt = task.attempts,
            "Claimed task"
        );
        self.execute_task(task).await?;
        Ok(true)
    }

    /// Runs due tasks until none is left. Returns how many ran.
    pub async fn run_until_idle(&self) -> Result<usize, PipelineError> {
        let mut executed = 0;
        while self.run_next_task().await? {
            executed += 1;
        }
        Ok(executed)
    }

    /// Runs a claimed task and records its outcome on the queue.
    pub async fn execute_task(&self, task: Task) -> Result<(), PipelineError> {
        match task.kind {
            TaskKind::Stage => self.execute_stage(task).await,
            TaskKind::CrossFile => self.execute_cross_file(task).await,
        }
    }

    async fn execute_stage(&self, task: Task) -> Result<(), PipelineError> {
        let tenant = task.tenant_id.clone();
        let Some(stage) = task.stage else {
            let message = "stage task without a stage";
            self.db
                .with_conn(|conn| task_repo::fail(conn, &tenant, &task.id, message))?;
            return Err(PipelineError::Fatal(format!("task '{}': {}", task.id, message)));
        };

        let span = info_span!(
            "stage",
            file_id = %task.subject_id,
            stage = stage.as_str(),
            attempt = task.attempts
        );
        async {
            match self.advance(&tenant, &task.subject_id, stage).await {
                Ok(outcome) => {
                    // The task stays `running` until the guard has been evaluated,
                    // so an interruption in between is replayed by `recover`.
                    if outcome.status().is_terminal() {
                        if let Err(e) = self.tracker.on_file_terminal(&tenant, &task.subject_id) {
                            self.reschedule_after_guard_failure(&task, &e)?;
                            return Err(e);
                        }
                    }
                    self.db
                        .with_conn(|conn| task_repo::complete(conn, &tenant, &task.id))?;
                    debug!(?outcome, "Stage task done");
                    Ok(())
                }
                Err(e) if e.is_retryable() && self.retry.should_retry(task.attempts) => {
                    let message = e.to_string();
                    let delay = self.retry.backoff(task.attempts);
                    let run_after = Utc::now()
                        + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                    let retries = self.db.with_tx(|tx| {
                        let retries = file_repo::record_retry(tx, &tenant, &task.subject_id, &message)?;
                        task_repo::reschedule(tx, &tenant, &task.id, run_after, &message)?;
                        Ok::<_, DatabaseError>(retries)
                    })?;
                    warn!(
                        error_kind = e.kind(),
                        error = %e,
                        retries,
                        delay_ms = delay.as_millis() as u64,
                        "Stage failed, retrying"
                    );
                    Ok(())
                }
                Err(e) => self.abandon_file(&task, stage, &e),
            }
        }
        .instrument(span)
        .await
    }

    /// Moves the file to `error` after writing the audit record.
    ///
    /// Without an audit record the file does not leave the pipeline: the task
    /// goes back on the queue and the audit error is returned.
    fn abandon_file(&self, task: &Task, stage: Stage, err: &PipelineError) -> Result<(), PipelineError> {
        let tenant = &task.tenant_id;
        let message = format!("{} failed: {}", stage, err);

        let entry = AuditEntry {
            tenant_id: tenant.clone(),
            actor: SYSTEM_ACTOR.to_string(),
            action: "file.failed".to_string(),
            entity_type: "file".to_string(),
            entity_id: task.subject_id.clone(),
            details: json!({
                "stage": stage.as_str(),
                "errorKind": err.kind(),
                "error": err.to_string(),
                "attempts": task.attempts,
            }),
        };
        if let Err(audit_err) = self.audit.write(&entry) {
            self.requeue_after_audit_failure(task, &audit_err)?;
            return Err(PipelineError::Audit(audit_err));
        }

        let moved = self
            .db
            .with_conn(|conn| file_repo::mark_error(conn, tenant, &task.subject_id, &message))?;
        error!(
            tenant = %tenant,
            error_kind = err.kind(),
            error = %err,
            moved,
            "Stage abandoned, file moved to error"
        );

        // A replay of this task sees the file in `error` and reaches the guard again.
        if let Err(e) = self.tracker.on_file_terminal(tenant, &task.subject_id) {
            self.reschedule_after_guard_failure(task, &e)?;
            return Err(e);
        }
        self.db
            .with_conn(|conn| task_repo::fail(conn, tenant, &task.id, &message))?;
        Ok(())
    }

    fn reschedule_after_guard_failure(&self, task: &Task, guard_err: &PipelineError) -> Result<(), PipelineError> {
        let delay = self.retry.backoff(task.attempts);
        let run_after =
            Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        let message = format!("batch completion check failed: {}", guard_err);
        warn!(error = %guard_err, delay_ms = delay.as_millis() as u64, "Batch completion check failed, task requeued");
        self.db.with_conn(|conn| {
            task_repo::reschedule(conn, &task.tenant_id, &task.id, run_after, &message)
        })?;
        Ok(())
    }

    fn requeue_after_audit_failure(&self, task: &Task, audit_err: &AuditError) -> Result<(), PipelineError> {
        let delay = self.retry.backoff(task.attempts);
        let run_after =
            Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        let message = format!("audit write failed: {}", audit_err);
        self.db.with_conn(|conn| {
            task_repo::reschedule(conn, &task.tenant_id, &task.id, run_after, &message)
        })?;
        Ok(())
    }

    async fn execute_cross_file(&self, task: Task) -> Result<(), PipelineError> {
        let tenant = &task.tenant_id;
        let span = info_span!("cross_file", batch_id = %task.subject_id, attempt = task.attempts);

        let cross_file = Arc::clone(&self.cross_file);
        let (owner, batch_id) = (tenant.clone(), task.subject_id.clone());
        let run_span = span.clone();
        let result = tokio::task::spawn_blocking(move || {
            let _entered = run_span.enter();
            cross_file.run_for_batch(&owner, &batch_id)
        })
        .await
        .map_err(|e| PipelineError::Fatal(format!("cross-file pass panicked: {}", e)))
        .and_then(|r| r);
        let _entered = span.enter();

        match result {
            Ok(outcome) => {
                self.db
                    .with_conn(|conn| task_repo::complete(conn, tenant, &task.id))?;
                debug!(ran = outcome.ran, findings = outcome.findings, "Cross-file task done");
                Ok(())
            }
            Err(e) if e.is_retryable() && self.retry.should_retry(task.attempts) => {
                let delay = self.retry.backoff(task.attempts);
                let run_after = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                self.db.with_conn(|conn| {
                    task_repo::reschedule(conn, tenant, &task.id, run_after, &e.to_string())
                })?;
                warn!(error = %e, delay_ms = delay.as_millis() as u64, "Cross-file analysis failed, retrying");
                Ok(())
            }
            Err(e) => {
                self.db
                    .with_conn(|conn| task_repo::fail(conn, tenant, &task.id, &e.to_string()))?;
                error!(error_kind = e.kind(), error = %e, "Cross-file analysis abandoned");
                Err(e)
            }
        }
    }

    /// Returns tasks left `running` by a previous process to the queue, then
    /// re-evaluates the completion guard of every open batch.
    ///
    /// Returns the number of requeued tasks.
    pub fn recover(&self) -> Result<usize, PipelineError> {
        let requeued = self.db.with_conn(cross_tenant::requeue_running)?;
        if requeued > 0 {
            info!(requeued, "Recovered interrupted tasks");
        }

        let open = self.db.with_conn(cross_tenant::open_batches)?;
        let mut completed = 0;
        for (tenant, batch_id) in &open {
            if self.tracker.evaluate(tenant, batch_id)? {
                completed += 1;
            }
        }
        if completed > 0 {
            info!(completed, open = open.len(), "Completed batches missed before restart");
        }
        Ok(requeued)
    }

    /// Applies a reviewer decision to a finding.
    ///
    /// The audit record is written first and its failure aborts the change.
    /// The file's score is marked stale in the same transaction as the update,
    /// then a debounced recompute is requested.
    pub fn review_finding(
        &self,
        tenant: &TenantId,
        finding_id: &str,
        status: ReviewStatus,
        user_id: &str,
    ) -> Result<Finding, PipelineError> {
        let finding = self
            .db
            .with_conn(|conn| finding_repo::find(conn, tenant, finding_id))?
            .ok_or_else(|| PipelineError::Validation(format!("finding '{}' not found", finding_id)))?;

        self.audit.write(&AuditEntry {
            tenant_id: tenant.clone(),
            actor: user_id.to_string(),
            action: "finding.review_status_changed".to_string(),
            entity_type: "finding".to_string(),
            entity_id: finding_id.to_string(),
            details: json!({
                "fileId": finding.file_id,
                "from": finding.review_status.as_str(),
                "to": status.as_str(),
            }),
        })?;

        let updated = self.db.with_tx(|tx| {
            finding_repo::update_review_status(tx, tenant, finding_id, status)?;
            score_repo::mark_stale(tx, tenant, &finding.file_id)?;
            finding_repo::find(tx, tenant, finding_id)?.ok_or_else(|| DatabaseError::NotFound {
                entity: "finding",
                id: finding_id.to_string(),
            })
        })?;

        self.scoring.request_recompute(tenant, &finding.file_id)?;
        debug!(finding_id, status = status.as_str(), "Finding reviewed");
        Ok(updated)
    }
}

fn check_project(file: &QaFile, project_id: &str) -> Result<(), PipelineError> {
    if file.project_id != project_id {
        return Err(PipelineError::Validation(format!(
            "file '{}' belongs to project '{}', not '{}'",
            file.id, file.project_id, project_id
        )));
    }
    Ok(())
}

/// Batch membership is closed once the batch completes. Files attached one
/// at a time through `process-file` complete the batch as soon as every file
/// attached so far is terminal; `batch-started` attaches its whole member set
/// in one transaction before the guard is evaluated.
fn attach_to_batch(
    conn: &Connection,
    tenant: &TenantId,
    file_id: &str,
    batch_id: &str,
) -> Result<(), PipelineError> {
    if file_repo::assign_batch(conn, tenant, file_id, batch_id)? {
        return Ok(());
    }
    let file = file_repo::get(conn, tenant, file_id)?;
    let reason = match file.batch_id {
        Some(other) if other != batch_id => format!("already belongs to batch '{}'", other),
        _ => format!("cannot join batch '{}' after it completed", batch_id),
    };
    Err(PipelineError::Validation(format!("file '{}' {}", file_id, reason)))
}
