pub mod ai;
pub mod collaborators;
pub mod config;
pub mod crossfile;
pub mod db;
pub mod error;
pub mod events;
pub mod model;
pub mod orchestrator;
pub mod parity;
pub mod rules;
pub mod scoring;
pub mod secrets;
pub mod telemetry;
pub mod tenant;

pub use ai::{AiProvider, DeepReviewTier, HttpAiProvider, ModelChain, ModelId, ScreeningTier};
pub use collaborators::{AuditWriter, DbAuditWriter, GlossaryProvider, SegmentSource};
pub use config::{load_config, Config};
pub use crossfile::{CrossFileAnalyzer, CrossFileService};
pub use db::Database;
pub use error::{AuditError, ConfigError, LocqaError, PipelineError, Result};
pub use events::{EventBus, PipelineEvent};
pub use orchestrator::{AdvanceOutcome, BatchTracker, Orchestrator, OrchestratorDeps, WorkerPool};
pub use parity::{normalize_category, ParityMatcher, ParityReport, ParityService};
pub use rules::RuleEngine;
pub use scoring::{compute_score, ScoreDebouncer, ScoringService, StaleScoreSweeper};
pub use secrets::{resolve_secret, SecretError};
pub use telemetry::{init_tracing, LogFormat};
pub use tenant::TenantId;
