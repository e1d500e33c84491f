//! Batch lifecycle: completion guard, cross-file pass and workers.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use locqa::collaborators::GlossaryTerm;
use locqa::db::batch_repo::{self, NewBatch};
use locqa::db::{cross_file_repo, cross_tenant, file_repo};
use locqa::error::PipelineError;
use locqa::events::PipelineEvent;
use locqa::model::{Category, CrossFileKind, FileStatus, Layer, NewFile, ProcessingMode, ScoreStatus, Stage};
use locqa::orchestrator::{spawn_event_listener, AdvanceOutcome, WorkerPool};

fn count_completions(rx: &mut tokio::sync::broadcast::Receiver<PipelineEvent>) -> usize {
    let mut completions = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, PipelineEvent::BatchCompleted { .. }) {
            completions += 1;
        }
    }
    completions
}

#[tokio::test]
async fn test_batch_with_failed_member_completes_once() {
    let h = TestHarness::new();
    h.add_file("f1", ProcessingMode::Economy, clean_segments("f1"));
    h.add_file("f2", ProcessingMode::Economy, clean_segments("f2"));
    h.add_file_without_segments("f3", ProcessingMode::Economy);
    let mut rx = h.events.subscribe();

    h.start_batch("b1", &["f1", "f2", "f3"], ProcessingMode::Economy).unwrap();
    let executed = h.orchestrator.run_until_idle().await.unwrap();

    // 4 stages for each good file, one failed parse, one cross-file pass
    assert_eq!(executed, 10);
    assert_eq!(h.file("f1").status, FileStatus::Scored);
    assert_eq!(h.file("f2").status, FileStatus::Scored);
    assert_eq!(h.file("f3").status, FileStatus::Error);
    assert!(h.score("f1").is_some());
    assert!(h.score("f3").is_none());

    let batch = h
        .db
        .with_conn(|conn| batch_repo::get(conn, &h.tenant, "b1"))
        .unwrap();
    assert!(batch.completed);
    assert!(batch.cross_file_analyzed);
    assert_eq!(batch.file_ids.len(), 3);

    assert_eq!(count_completions(&mut rx), 1);
    assert_eq!(h.audit_actions("batch", "b1"), vec!["batch.started"]);
}

#[tokio::test]
async fn test_repeated_completion_signals_are_harmless() {
    let h = TestHarness::new();
    h.add_file("f1", ProcessingMode::Economy, clean_segments("f1"));
    h.add_file("f2", ProcessingMode::Economy, clean_segments("f2"));
    h.start_batch("b1", &["f1", "f2"], ProcessingMode::Economy).unwrap();
    h.orchestrator.run_until_idle().await.unwrap();
    let mut rx = h.events.subscribe();

    for file_id in ["f1", "f2", "f1"] {
        assert!(!h.orchestrator.tracker().on_file_terminal(&h.tenant, file_id).unwrap());
    }
    assert!(!h.orchestrator.tracker().evaluate(&h.tenant, "b1").unwrap());

    let completed = PipelineEvent::BatchCompleted {
        batch_id: "b1".to_string(),
        project_id: PROJECT.to_string(),
        tenant_id: h.tenant.clone(),
        file_ids: vec!["f1".to_string(), "f2".to_string()],
    };
    h.orchestrator.handle_event(&completed).unwrap();
    h.orchestrator.handle_event(&completed).unwrap();

    assert_eq!(h.orchestrator.run_until_idle().await.unwrap(), 0);
    assert_eq!(count_completions(&mut rx), 0);
}

fn process_into_batch(h: &TestHarness, file_id: &str, batch_id: &str) -> Result<(), PipelineError> {
    h.orchestrator.handle_event(&PipelineEvent::ProcessFile {
        file_id: file_id.to_string(),
        project_id: PROJECT.to_string(),
        tenant_id: h.tenant.clone(),
        mode: ProcessingMode::Economy,
        batch_id: Some(batch_id.to_string()),
        user_id: "reviewer-1".to_string(),
    })
}

fn batch_state(h: &TestHarness, batch_id: &str) -> (bool, bool) {
    let batch = h
        .db
        .with_conn(|conn| batch_repo::get(conn, &h.tenant, batch_id))
        .unwrap();
    (batch.completed, batch.cross_file_analyzed)
}

#[tokio::test]
async fn test_batch_of_already_scored_files_completes_at_start() {
    let h = TestHarness::new();
    h.add_file("f1", ProcessingMode::Economy, clean_segments("f1"));
    h.process("f1", ProcessingMode::Economy).unwrap();
    assert_eq!(h.orchestrator.run_until_idle().await.unwrap(), 4);
    assert_eq!(h.file("f1").status, FileStatus::Scored);
    let mut rx = h.events.subscribe();

    h.start_batch("b1", &["f1"], ProcessingMode::Economy).unwrap();

    // No stage is left to run; only the cross-file pass is queued.
    assert_eq!(h.orchestrator.run_until_idle().await.unwrap(), 1);
    assert_eq!(batch_state(&h, "b1"), (true, true));
    assert_eq!(count_completions(&mut rx), 1);
}

#[tokio::test]
async fn test_scored_file_joining_registered_batch_completes_it() {
    let h = TestHarness::new();
    h.orchestrator
        .register_batch(&NewBatch {
            id: "b1".to_string(),
            tenant_id: h.tenant.clone(),
            project_id: PROJECT.to_string(),
            mode: ProcessingMode::Economy,
            glossary_id: None,
        })
        .unwrap();
    h.add_file("f1", ProcessingMode::Economy, clean_segments("f1"));
    h.process("f1", ProcessingMode::Economy).unwrap();
    h.orchestrator.run_until_idle().await.unwrap();
    assert_eq!(batch_state(&h, "b1"), (false, false));

    process_into_batch(&h, "f1", "b1").unwrap();

    assert!(batch_state(&h, "b1").0);
    assert_eq!(h.orchestrator.run_until_idle().await.unwrap(), 1);
    assert_eq!(batch_state(&h, "b1"), (true, true));
}

#[tokio::test]
async fn test_interrupted_completion_check_is_replayed_on_recover() {
    let h = TestHarness::new();
    h.add_file("f1", ProcessingMode::Economy, clean_segments("f1"));
    h.start_batch("b1", &["f1"], ProcessingMode::Economy).unwrap();
    for _ in 0..3 {
        assert!(h.orchestrator.run_next_task().await.unwrap());
    }

    // The score stage commits, then the process dies before anything else.
    let claimed = h
        .db
        .with_conn(|conn| cross_tenant::claim_next(conn, chrono::Utc::now()))
        .unwrap()
        .unwrap();
    assert_eq!(claimed.stage, Some(Stage::Score));
    let outcome = h.orchestrator.advance(&h.tenant, "f1", Stage::Score).await.unwrap();
    assert!(matches!(outcome, AdvanceOutcome::Advanced { status: FileStatus::Scored, .. }));
    assert_eq!(batch_state(&h, "b1"), (false, false));
    let mut rx = h.events.subscribe();

    assert_eq!(h.orchestrator.recover().unwrap(), 1);
    // The replayed score task finds the stage done; the batch completes once.
    assert_eq!(h.orchestrator.run_until_idle().await.unwrap(), 2);
    assert_eq!(batch_state(&h, "b1"), (true, true));
    assert_eq!(count_completions(&mut rx), 1);
}

#[tokio::test]
async fn test_recover_completes_batch_whose_guard_never_ran() {
    let h = TestHarness::new();
    h.add_file("f1", ProcessingMode::Economy, clean_segments("f1"));
    h.start_batch("b1", &["f1"], ProcessingMode::Economy).unwrap();
    for _ in 0..3 {
        h.orchestrator.run_next_task().await.unwrap();
    }
    // Score task closed by a process that died before evaluating the guard.
    let claimed = h
        .db
        .with_conn(|conn| cross_tenant::claim_next(conn, chrono::Utc::now()))
        .unwrap()
        .unwrap();
    h.orchestrator.advance(&h.tenant, "f1", Stage::Score).await.unwrap();
    h.db
        .with_conn(|conn| locqa::db::task_repo::complete(conn, &h.tenant, &claimed.id))
        .unwrap();
    assert_eq!(batch_state(&h, "b1"), (false, false));

    assert_eq!(h.orchestrator.recover().unwrap(), 0);
    assert!(batch_state(&h, "b1").0);
    assert_eq!(h.orchestrator.run_until_idle().await.unwrap(), 1);
    assert_eq!(batch_state(&h, "b1"), (true, true));
}

#[tokio::test]
async fn test_completed_batch_accepts_no_new_members() {
    let h = TestHarness::new();
    h.add_file("f1", ProcessingMode::Economy, clean_segments("f1"));
    h.start_batch("b1", &["f1"], ProcessingMode::Economy).unwrap();
    h.orchestrator.run_until_idle().await.unwrap();
    assert_eq!(batch_state(&h, "b1"), (true, true));
    h.add_file("f2", ProcessingMode::Economy, clean_segments("f2"));

    let err = process_into_batch(&h, "f2", "b1").unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
    let err = h.start_batch("b1", &["f1", "f2"], ProcessingMode::Economy).unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));

    assert_eq!(h.file("f2").batch_id, None);
    assert_eq!(h.orchestrator.pending_tasks().unwrap(), 0);
    let members: Vec<String> = h
        .db
        .with_conn(|conn| file_repo::list_by_batch(conn, &h.tenant, "b1"))
        .unwrap()
        .into_iter()
        .map(|f| f.id)
        .collect();
    assert_eq!(members, vec!["f1".to_string()]);

    // Redelivery of the original start stays harmless.
    h.start_batch("b1", &["f1"], ProcessingMode::Economy).unwrap();
    assert_eq!(h.orchestrator.run_until_idle().await.unwrap(), 0);
}

#[tokio::test]
async fn test_batch_start_is_idempotent() {
    let h = TestHarness::new();
    h.add_file("f1", ProcessingMode::Economy, clean_segments("f1"));

    h.start_batch("b1", &["f1"], ProcessingMode::Economy).unwrap();
    h.start_batch("b1", &["f1"], ProcessingMode::Economy).unwrap();

    assert_eq!(h.orchestrator.pending_tasks().unwrap(), 1);
    assert_eq!(h.orchestrator.run_until_idle().await.unwrap(), 5);
}

#[tokio::test]
async fn test_inconsistent_translations_mark_scores_stale() {
    let h = TestHarness::new();
    h.add_file("f1", ProcessingMode::Economy, clean_segments("f1"));
    let mut divergent = clean_segments("f2");
    divergent[0] = segment("f2", 1, "Save the document.", "Sichern Sie das Dokument.");
    h.add_file("f2", ProcessingMode::Economy, divergent);

    h.start_batch("b1", &["f1", "f2"], ProcessingMode::Economy).unwrap();
    h.orchestrator.run_until_idle().await.unwrap();

    let cross = h
        .db
        .with_conn(|conn| cross_file_repo::list_by_batch(conn, &h.tenant, "b1"))
        .unwrap();
    assert_eq!(cross.len(), 1);
    assert_eq!(cross[0].kind, CrossFileKind::InconsistentTranslation);
    assert_eq!(cross[0].file_ids, vec!["f1".to_string(), "f2".to_string()]);

    for file_id in ["f1", "f2"] {
        let findings = h.findings(file_id);
        let consistency: Vec<_> = findings.iter().filter(|f| f.layer == Layer::CrossFile).collect();
        assert_eq!(consistency.len(), 1);
        assert_eq!(consistency[0].category, Category::Consistency);
        assert_eq!(h.score(file_id).unwrap().status, ScoreStatus::Stale);
    }

    // The sweep catches up without waiting for the debounce timers.
    assert_eq!(h.orchestrator.scoring().sweep_stale().unwrap(), 2);
    let score = h.score("f1").unwrap();
    assert_eq!(score.status, ScoreStatus::Computed);
    assert_eq!(score.minor_count, 1);
    assert_eq!(score.mqm_score, 66.67);
}

#[tokio::test]
async fn test_glossary_violations_are_reported_per_batch() {
    let h = TestHarness::with_terms(vec![GlossaryTerm {
        source_term: "settings".to_string(),
        target_term: "Optionen".to_string(),
        case_sensitive: false,
    }]);
    h.add_file("f1", ProcessingMode::Economy, clean_segments("f1"));
    h.add_file("f2", ProcessingMode::Economy, clean_segments("f2"));

    h.start_batch("b1", &["f1", "f2"], ProcessingMode::Economy).unwrap();
    h.orchestrator.run_until_idle().await.unwrap();

    let cross = h
        .db
        .with_conn(|conn| cross_file_repo::list_by_batch(conn, &h.tenant, "b1"))
        .unwrap();
    assert_eq!(cross.len(), 1);
    assert_eq!(cross[0].kind, CrossFileKind::TerminologyMismatch);
    assert_eq!(cross[0].segment_ids, vec!["f1-s2".to_string(), "f2-s2".to_string()]);
    assert!(h
        .findings("f2")
        .iter()
        .any(|f| f.layer == Layer::CrossFile && f.category == Category::Terminology));
}

#[tokio::test]
async fn test_batch_start_rejects_invalid_membership() {
    let h = TestHarness::new();
    h.add_file("f1", ProcessingMode::Economy, clean_segments("f1"));
    h.orchestrator
        .register_file(&NewFile {
            id: "other".to_string(),
            tenant_id: h.tenant.clone(),
            project_id: "p2".to_string(),
            file_name: "other.xliff".to_string(),
            mode: ProcessingMode::Economy,
        })
        .unwrap();

    let err = h.start_batch("b0", &[], ProcessingMode::Economy).unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));

    let err = h.start_batch("b1", &["f1", "other"], ProcessingMode::Economy).unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
    // Nothing from the rejected batch was applied.
    assert_eq!(h.file("f1").batch_id, None);
    assert_eq!(h.orchestrator.pending_tasks().unwrap(), 0);

    h.start_batch("b2", &["f1"], ProcessingMode::Economy).unwrap();
    let err = h.start_batch("b3", &["f1"], ProcessingMode::Economy).unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
    assert_eq!(h.file("f1").batch_id.as_deref(), Some("b2"));
}

#[tokio::test]
async fn test_registered_batch_uses_its_own_glossary() {
    // Served for the project glossary only; the batch names another one.
    let h = TestHarness::with_terms(vec![GlossaryTerm {
        source_term: "settings".to_string(),
        target_term: "Optionen".to_string(),
        case_sensitive: false,
    }]);
    assert!(h
        .orchestrator
        .register_batch(&NewBatch {
            id: "b1".to_string(),
            tenant_id: h.tenant.clone(),
            project_id: PROJECT.to_string(),
            mode: ProcessingMode::Economy,
            glossary_id: Some("unused-glossary".to_string()),
        })
        .unwrap());
    h.add_file("f1", ProcessingMode::Economy, clean_segments("f1"));

    h.start_batch("b1", &["f1"], ProcessingMode::Economy).unwrap();
    h.orchestrator.run_until_idle().await.unwrap();

    let batch = h
        .db
        .with_conn(|conn| batch_repo::get(conn, &h.tenant, "b1"))
        .unwrap();
    assert_eq!(batch.glossary_id.as_deref(), Some("unused-glossary"));
    assert!(batch.cross_file_analyzed);
    let cross = h
        .db
        .with_conn(|conn| cross_file_repo::list_by_batch(conn, &h.tenant, "b1"))
        .unwrap();
    assert!(cross.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_workers_drive_a_batch_from_events() {
    let h = TestHarness::new();
    for file_id in ["f1", "f2", "f3"] {
        h.add_file(file_id, ProcessingMode::Thorough, flawed_segments(file_id));
    }
    h.provider.escalate(&["f1-s2", "f2-s2", "f3-s2"]);
    h.provider.report("f2-s2", "accuracy", "major");

    let TestHarness {
        db,
        tenant,
        events,
        orchestrator,
        ..
    } = h;
    let orchestrator = Arc::new(orchestrator);
    let mut completions = events.subscribe();
    let listener = spawn_event_listener(orchestrator.clone(), events.subscribe());
    let pool = WorkerPool::start(orchestrator.clone(), 3, Duration::from_millis(10));

    events.publish(PipelineEvent::BatchStarted {
        batch_id: "b1".to_string(),
        project_id: PROJECT.to_string(),
        tenant_id: tenant.clone(),
        file_ids: vec!["f1".to_string(), "f2".to_string(), "f3".to_string()],
        mode: ProcessingMode::Thorough,
    });

    let completed = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Ok(PipelineEvent::BatchCompleted { batch_id, .. }) = completions.recv().await {
                break batch_id;
            }
        }
    })
    .await
    .expect("batch did not complete in time");
    assert_eq!(completed, "b1");

    for file_id in ["f1", "f2", "f3"] {
        let file = db
            .with_conn(|conn| file_repo::get(conn, &tenant, file_id))
            .unwrap();
        assert_eq!(file.status, FileStatus::Scored);
    }

    pool.shutdown();
    assert!(pool.is_shutdown());
    pool.wait().await;
    listener.abort();
}
