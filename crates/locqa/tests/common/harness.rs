//! Test harness for isolated pipeline runs.
//!
//! The `TestHarness` struct wires an [`Orchestrator`] to:
//! - an in-memory SQLite database
//! - in-memory segments and a static glossary
//! - a scripted AI provider that records every call
//! - an audit writer that can be switched off to simulate an outage

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use locqa::ai::{
    AiError, AiProvider, AiTier, ChainPolicy, DeepReviewTier, ModelChain, ModelId, ScreeningTier, TierRequest,
};
use locqa::collaborators::memory::{InMemorySegmentSource, StaticGlossary};
use locqa::collaborators::{AuditWriter, DbAuditWriter, GlossaryTerm};
use locqa::config::L2Scope;
use locqa::crossfile::CrossFileService;
use locqa::db::audit_repo::{self, AuditEntry};
use locqa::db::{file_repo, finding_repo, score_repo, Database};
use locqa::error::{AuditError, PipelineError};
use locqa::events::{EventBus, PipelineEvent};
use locqa::model::{Finding, NewFile, ProcessingMode, QaFile, Score, Segment};
use locqa::orchestrator::{Orchestrator, OrchestratorDeps, RetryPolicy};
use locqa::rules::RuleEngine;
use locqa::scoring::{RecomputeSink, ScoreRecomputer, ScoringService, ScoringWeights};
use locqa::tenant::TenantId;

pub const PROJECT: &str = "p1";
pub const DEBOUNCE: Duration = Duration::from_millis(500);

/// AI provider answering from a script.
///
/// Screening escalates the configured segment ids with category `accuracy`.
/// Deep review reports the configured issues. Ids that are not part of the
/// request are ignored by the tiers, so one script can serve many files.
#[derive(Default)]
pub struct ScriptedProvider {
    escalate: Mutex<Vec<String>>,
    issues: Mutex<Vec<(String, String, String)>>,
    failure: Mutex<Option<AiError>>,
    calls: Mutex<Vec<(ModelId, AiTier)>>,
}

impl ScriptedProvider {
    pub fn escalate(&self, segment_ids: &[&str]) {
        let mut escalate = self.escalate.lock().unwrap();
        escalate.extend(segment_ids.iter().map(|s| s.to_string()));
    }

    pub fn report(&self, segment_id: &str, category: &str, severity: &str) {
        self.issues
            .lock()
            .unwrap()
            .push((segment_id.to_string(), category.to_string(), severity.to_string()));
    }

    /// Every call fails with `error` until [`Self::recover`] is called.
    pub fn fail_with(&self, error: AiError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn recover(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn calls(&self) -> Vec<(ModelId, AiTier)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, tier: AiTier) -> usize {
        self.calls().iter().filter(|(_, t)| *t == tier).count()
    }
}

#[async_trait]
impl AiProvider for ScriptedProvider {
    async fn invoke(&self, model: ModelId, request: &TierRequest) -> Result<String, AiError> {
        self.calls.lock().unwrap().push((model, request.tier));
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }

        let answer = match request.tier {
            AiTier::Screening => {
                let results: Vec<_> = self
                    .escalate
                    .lock()
                    .unwrap()
                    .iter()
                    .map(|id| json!({"segmentId": id, "escalate": true, "category": "accuracy"}))
                    .collect();
                json!({ "results": results })
            }
            AiTier::DeepReview => {
                let findings: Vec<_> = self
                    .issues
                    .lock()
                    .unwrap()
                    .iter()
                    .map(|(id, category, severity)| {
                        json!({
                            "segmentId": id,
                            "category": category,
                            "severity": severity,
                            "description": format!("{} problem", category),
                        })
                    })
                    .collect();
                json!({ "findings": findings })
            }
        };
        Ok(format!("```json\n{}\n```", answer))
    }
}

/// Database-backed audit writer with an off switch.
pub struct SwitchableAudit {
    inner: DbAuditWriter,
    offline: AtomicBool,
}

impl SwitchableAudit {
    pub fn new(db: Database) -> Self {
        Self {
            inner: DbAuditWriter::new(db),
            offline: AtomicBool::new(false),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

impl AuditWriter for SwitchableAudit {
    fn write(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AuditError("audit store offline".to_string()));
        }
        self.inner.write(entry)
    }
}

/// Records debounced recomputes instead of running them.
#[derive(Default)]
pub struct CountingSink {
    calls: Mutex<Vec<(TenantId, String)>>,
}

impl CountingSink {
    pub fn count_for(&self, file_id: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(_, f)| f == file_id).count()
    }

    pub fn total(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl RecomputeSink for CountingSink {
    async fn recompute(&self, tenant: &TenantId, file_id: &str) -> Result<(), PipelineError> {
        self.calls
            .lock()
            .unwrap()
            .push((tenant.clone(), file_id.to_string()));
        Ok(())
    }
}

pub struct TestHarness {
    pub db: Database,
    pub tenant: TenantId,
    pub segments: Arc<InMemorySegmentSource>,
    pub provider: Arc<ScriptedProvider>,
    pub audit: Arc<SwitchableAudit>,
    pub events: EventBus,
    pub orchestrator: Orchestrator,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::build(None, L2Scope::All, Vec::new())
    }

    /// Debounced recomputes go to `sink` instead of the database.
    pub fn with_recompute_sink(sink: Arc<dyn RecomputeSink>) -> Self {
        Self::build(Some(sink), L2Scope::All, Vec::new())
    }

    pub fn with_l2_scope(scope: L2Scope) -> Self {
        Self::build(None, scope, Vec::new())
    }

    /// Glossary terms served for the project's glossary.
    pub fn with_terms(terms: Vec<GlossaryTerm>) -> Self {
        Self::build(None, L2Scope::All, terms)
    }

    fn build(sink: Option<Arc<dyn RecomputeSink>>, l2_scope: L2Scope, terms: Vec<GlossaryTerm>) -> Self {
        let db = Database::open_in_memory().expect("Failed to open in-memory database");
        let tenant = TenantId::new("acme").unwrap();
        let segments = Arc::new(InMemorySegmentSource::new());
        let glossary = Arc::new(StaticGlossary::new().with_terms(PROJECT, terms));
        let provider = Arc::new(ScriptedProvider::default());
        let audit = Arc::new(SwitchableAudit::new(db.clone()));
        let events = EventBus::default();

        let policy = ChainPolicy {
            attempts_per_model: 1,
            retry_delay: Duration::ZERO,
        };
        let screening = ScreeningTier::new(
            provider.clone(),
            ModelChain::new(AiTier::Screening, vec![ModelId::Gpt4oMini, ModelId::Gemini20Flash]).unwrap(),
            policy,
            50,
        );
        let deep_review = DeepReviewTier::new(
            provider.clone(),
            ModelChain::new(AiTier::DeepReview, vec![ModelId::ClaudeSonnet4]).unwrap(),
            policy,
            20,
        );

        let recomputer = Arc::new(ScoreRecomputer::new(db.clone(), ScoringWeights::default(), 95.0));
        let scoring = Arc::new(match sink {
            Some(sink) => ScoringService::with_sink(db.clone(), recomputer, sink, DEBOUNCE),
            None => ScoringService::new(db.clone(), recomputer, DEBOUNCE),
        });
        let cross_file = CrossFileService::new(db.clone(), segments.clone(), glossary.clone(), scoring.clone());

        let orchestrator = Orchestrator::new(OrchestratorDeps {
            db: db.clone(),
            segments: segments.clone(),
            glossary,
            audit: audit.clone(),
            rules: RuleEngine::new().unwrap(),
            screening,
            deep_review,
            scoring,
            cross_file,
            events: events.clone(),
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::ZERO,
                multiplier: 2.0,
                max_delay: Duration::ZERO,
            },
            l2_scope,
        });

        Self {
            db,
            tenant,
            segments,
            provider,
            audit,
            events,
            orchestrator,
        }
    }

    /// Registers a file and makes its segments available.
    pub fn add_file(&self, file_id: &str, mode: ProcessingMode, segments: Vec<Segment>) {
        self.add_file_without_segments(file_id, mode);
        self.segments.insert(&self.tenant, file_id, segments);
    }

    /// Registers a file whose segments the segment store does not know.
    pub fn add_file_without_segments(&self, file_id: &str, mode: ProcessingMode) {
        self.orchestrator
            .register_file(&NewFile {
                id: file_id.to_string(),
                tenant_id: self.tenant.clone(),
                project_id: PROJECT.to_string(),
                file_name: format!("{}.xliff", file_id),
                mode,
            })
            .unwrap();
    }

    pub fn process(&self, file_id: &str, mode: ProcessingMode) -> Result<(), PipelineError> {
        self.orchestrator.handle_event(&PipelineEvent::ProcessFile {
            file_id: file_id.to_string(),
            project_id: PROJECT.to_string(),
            tenant_id: self.tenant.clone(),
            mode,
            batch_id: None,
            user_id: "reviewer-1".to_string(),
        })
    }

    pub fn start_batch(&self, batch_id: &str, file_ids: &[&str], mode: ProcessingMode) -> Result<(), PipelineError> {
        self.orchestrator.handle_event(&PipelineEvent::BatchStarted {
            batch_id: batch_id.to_string(),
            project_id: PROJECT.to_string(),
            tenant_id: self.tenant.clone(),
            file_ids: file_ids.iter().map(|s| s.to_string()).collect(),
            mode,
        })
    }

    pub fn file(&self, file_id: &str) -> QaFile {
        self.db
            .with_conn(|conn| file_repo::get(conn, &self.tenant, file_id))
            .unwrap()
    }

    pub fn findings(&self, file_id: &str) -> Vec<Finding> {
        self.db
            .with_conn(|conn| finding_repo::list_by_file(conn, &self.tenant, file_id))
            .unwrap()
    }

    pub fn score(&self, file_id: &str) -> Option<Score> {
        self.db
            .with_conn(|conn| score_repo::find(conn, &self.tenant, file_id))
            .unwrap()
    }

    pub fn audit_actions(&self, entity_type: &str, entity_id: &str) -> Vec<String> {
        self.db
            .with_conn(|conn| audit_repo::list_for_entity(conn, &self.tenant, entity_type, entity_id))
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
