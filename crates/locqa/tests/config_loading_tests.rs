//! Table-driven tests for configuration loading and validation, plus
//! building a working orchestrator from a loaded file.

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use common::*;
use locqa::ai::{AiTier, ModelId};
use locqa::collaborators::memory::{InMemorySegmentSource, StaticGlossary};
use locqa::config::{load_config, load_config_from_str, L2Scope};
use locqa::db::{score_repo, Database};
use locqa::error::ConfigError;
use locqa::events::{EventBus, PipelineEvent};
use locqa::model::{NewFile, ProcessingMode, ScoreStatus};
use locqa::orchestrator::Orchestrator;
use locqa::tenant::TenantId;

/// Represents a single config loading test case.
struct ConfigTestCase {
    /// Test case name for identification.
    name: &'static str,
    config_json: &'static str,
    should_succeed: bool,
    /// Expected error substring (if should_succeed is false).
    expected_error: Option<&'static str>,
}

const JSON_CONFIG_TESTS: &[ConfigTestCase] = &[
    ConfigTestCase {
        name: "valid_minimal",
        config_json: r#"{ "version": "1.0" }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "valid_single_model_chains",
        config_json: r#"{
            "version": "1.0",
            "ai": {
                "screening_chain": ["gemini-2.0-flash"],
                "deep_review_chain": ["claude-sonnet-4"]
            }
        }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "invalid_version",
        config_json: r#"{ "version": "2.0" }"#,
        should_succeed: false,
        expected_error: Some("version"),
    },
    ConfigTestCase {
        name: "missing_version",
        config_json: r#"{ "worker": { "worker_count": 2 } }"#,
        should_succeed: false,
        expected_error: Some("version"),
    },
    ConfigTestCase {
        name: "unknown_top_level_key",
        config_json: r#"{ "version": "1.0", "input_directory": "/input" }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "unknown_model",
        config_json: r#"{ "version": "1.0", "ai": { "screening_chain": ["gpt-5-turbo"] } }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "duplicate_model",
        config_json: r#"{ "version": "1.0", "ai": { "deep_review_chain": ["gpt-4o", "gpt-4o"] } }"#,
        should_succeed: false,
        expected_error: None,
    },
    ConfigTestCase {
        name: "bad_l2_scope",
        config_json: r#"{ "version": "1.0", "ai": { "l2_scope": "some" } }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "zero_workers",
        config_json: r#"{ "version": "1.0", "worker": { "worker_count": 0 } }"#,
        should_succeed: false,
        expected_error: None,
    },
    ConfigTestCase {
        name: "fuzzy_threshold_above_one",
        config_json: r#"{ "version": "1.0", "parity": { "fuzzy_threshold": 1.5 } }"#,
        should_succeed: false,
        expected_error: None,
    },
    ConfigTestCase {
        name: "pass_threshold_out_of_range",
        config_json: r#"{ "version": "1.0", "scoring": { "pass_threshold": 120 } }"#,
        should_succeed: false,
        expected_error: None,
    },
    ConfigTestCase {
        name: "malformed_json",
        config_json: r#"{ "version": "1.0", "#,
        should_succeed: false,
        expected_error: Some("parse"),
    },
];

#[test]
fn test_json_config_table() {
    for case in JSON_CONFIG_TESTS {
        let result = load_config_from_str(case.config_json);
        match (case.should_succeed, result) {
            (true, Ok(_)) => {}
            (true, Err(e)) => panic!("case '{}' should load but failed: {}", case.name, e),
            (false, Ok(_)) => panic!("case '{}' should fail but loaded", case.name),
            (false, Err(e)) => {
                if let Some(expected) = case.expected_error {
                    let message = e.to_string();
                    assert!(
                        message.to_lowercase().contains(&expected.to_lowercase()),
                        "case '{}': expected error containing '{}', got '{}'",
                        case.name,
                        expected,
                        message
                    );
                }
            }
        }
    }
}

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/configs")
        .join(name)
}

#[test]
fn test_production_fixture_loads() {
    let config = load_config(fixture("production.json")).unwrap();

    assert_eq!(config.worker.worker_count, 4);
    assert_eq!(config.retry.max_attempts, 2);
    assert_eq!(config.scoring.weights.critical, 10.0);
    assert_eq!(config.scoring.pass_threshold, 90.0);
    assert_eq!(
        config.ai.screening_chain,
        vec![ModelId::Claude35Haiku, ModelId::Gpt4oMini]
    );
    assert_eq!(config.ai.l2_scope, L2Scope::L1Flagged);
    assert_eq!(config.ai.api_key_env.as_deref(), Some("LOCQA_GATEWAY_KEY"));
    assert_eq!(config.parity.fuzzy_threshold, 0.85);
    assert_eq!(
        config.database.resolved_path(),
        Some(PathBuf::from("/var/lib/locqa/locqa.db"))
    );
}

#[test]
fn test_rejected_fixtures() {
    assert!(matches!(
        load_config(fixture("unknown-model.json")),
        Err(ConfigError::SchemaValidation { .. })
    ));
    assert!(load_config(fixture("empty-chain.json")).is_err());
    assert!(matches!(
        load_config(fixture("misordered-weights.json")),
        Err(ConfigError::Validation { .. })
    ));
    assert!(matches!(
        load_config(fixture("does-not-exist.json")),
        Err(ConfigError::ReadFile { .. })
    ));
}

struct Built {
    db: Database,
    tenant: TenantId,
    segments: Arc<InMemorySegmentSource>,
    provider: Arc<ScriptedProvider>,
    orchestrator: Orchestrator,
}

fn build_from(name: &str) -> Built {
    let config = load_config(fixture(name)).unwrap();
    let db = Database::open_in_memory().unwrap();
    let segments = Arc::new(InMemorySegmentSource::new());
    let provider = Arc::new(ScriptedProvider::default());
    let orchestrator = Orchestrator::from_config(
        &config,
        db.clone(),
        provider.clone(),
        segments.clone(),
        Arc::new(StaticGlossary::new()),
        Arc::new(SwitchableAudit::new(db.clone())),
        EventBus::default(),
    )
    .unwrap();

    Built {
        db,
        tenant: TenantId::new("acme").unwrap(),
        segments,
        provider,
        orchestrator,
    }
}

fn submit(built: &Built, file_id: &str, segments: Vec<locqa::model::Segment>) {
    built
        .orchestrator
        .register_file(&NewFile {
            id: file_id.to_string(),
            tenant_id: built.tenant.clone(),
            project_id: PROJECT.to_string(),
            file_name: format!("{}.xliff", file_id),
            mode: ProcessingMode::Economy,
        })
        .unwrap();
    built.segments.insert(&built.tenant, file_id, segments);
    built
        .orchestrator
        .handle_event(&PipelineEvent::ProcessFile {
            file_id: file_id.to_string(),
            project_id: PROJECT.to_string(),
            tenant_id: built.tenant.clone(),
            mode: ProcessingMode::Economy,
            batch_id: None,
            user_id: "reviewer-1".to_string(),
        })
        .unwrap();
}

#[tokio::test]
async fn test_orchestrator_from_fixture_follows_its_settings() {
    let built = build_from("production.json");

    // Flagged scope: a clean file never reaches the screening models.
    submit(&built, "clean", clean_segments("clean"));
    assert_eq!(built.orchestrator.run_until_idle().await.unwrap(), 4);
    assert_eq!(built.provider.calls_for(AiTier::Screening), 0);
    let score = built
        .db
        .with_conn(|conn| score_repo::find(conn, &built.tenant, "clean"))
        .unwrap()
        .unwrap();
    assert_eq!(score.status, ScoreStatus::Computed);
    assert_eq!(score.mqm_score, 100.0);
    assert!(score.passed);

    // The ambiguous number mismatch is screened by the first configured model.
    built.provider.escalate(&["flawed-s2"]);
    submit(&built, "flawed", flawed_segments("flawed"));
    assert_eq!(built.orchestrator.run_until_idle().await.unwrap(), 4);
    assert_eq!(
        built.provider.calls(),
        vec![(ModelId::Claude35Haiku, AiTier::Screening)]
    );
}

#[tokio::test]
async fn test_minimal_fixture_builds_with_defaults() {
    let built = build_from("minimal.json");

    submit(&built, "f1", clean_segments("f1"));
    assert_eq!(built.orchestrator.run_until_idle().await.unwrap(), 4);
    // Default scope screens every segment with the default primary model.
    assert_eq!(
        built.provider.calls(),
        vec![(ModelId::Gpt4oMini, AiTier::Screening)]
    );
}
