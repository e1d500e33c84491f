use async_trait::async_trait;
use thiserror::Error;

use super::model::{AiTier, ModelId};

/// Failure of a single model call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AiError {
    /// Timeout, rate limit or 5xx. Worth retrying the same model.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Rejected request or unusable model. Move on to the next model.
    #[error("fatal provider error: {0}")]
    Fatal(String),

    /// The model answered, but not in the requested structure.
    #[error("malformed model output: {0}")]
    Malformed(String),
}

/// One prompt sent to one tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierRequest {
    pub tier: AiTier,
    pub system: String,
    pub prompt: String,
}

/// Backend able to run a prompt against a named model.
///
/// Implementations return the raw text of the answer; structure is checked by
/// the caller so that malformed output takes part in the fallback chain.
#[async_trait]
pub trait AiProvider: Send + Sync {
    async fn invoke(&self, model: ModelId, request: &TierRequest) -> Result<String, AiError>;
}
