use std::path::PathBuf;
use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum LocqaError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] crate::telemetry::TelemetryError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("AI provider error: {0}")]
    Ai(#[from] crate::ai::AiError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid model chain for tier '{tier}': {reason}")]
    InvalidModelChain { tier: String, reason: String },
}

/// Failure taxonomy for stage execution.
///
/// Only [`PipelineError::TransientProvider`] and [`PipelineError::Persistence`]
/// are retried by the orchestrator; everything else abandons the unit of work.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Malformed input. Never retried.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// AI provider timeout, rate limit or exhausted fallback chain.
    #[error("Transient provider error: {0}")]
    TransientProvider(String),

    /// Write contention or connection failure.
    #[error("Persistence error: {0}")]
    Persistence(#[source] DatabaseError),

    /// Unrecoverable; the file is moved to `error`.
    #[error("Fatal pipeline error: {0}")]
    Fatal(String),

    /// Audit trail could not be written. Always fatal to the triggering operation.
    #[error("Audit write failed: {0}")]
    Audit(#[from] AuditError),
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::TransientProvider(_) | PipelineError::Persistence(_)
        )
    }

    /// Short stable name used in logs and task rows.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "validation",
            PipelineError::TransientProvider(_) => "transient_provider",
            PipelineError::Persistence(_) => "persistence",
            PipelineError::Fatal(_) => "fatal",
            PipelineError::Audit(_) => "audit",
        }
    }
}

impl From<DatabaseError> for PipelineError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { entity, id } => {
                PipelineError::Validation(format!("{} '{}' not found", entity, id))
            }
            DatabaseError::InvalidColumn { .. } => PipelineError::Fatal(err.to_string()),
            other => PipelineError::Persistence(other),
        }
    }
}

/// Error returned by an [`AuditWriter`](crate::collaborators::AuditWriter).
#[derive(Error, Debug)]
#[error("{0}")]
pub struct AuditError(pub String);

pub type Result<T> = std::result::Result<T, LocqaError>;
