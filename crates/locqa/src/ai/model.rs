//! Enumerated models and per-tier fallback chains.
//!
//! There is no default model anywhere: every tier is configured with an
//! explicit, ordered, non-empty chain.

use serde::{Deserialize, Serialize};

/// Every model the pipeline is allowed to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelId {
    #[serde(rename = "gpt-4o-mini")]
    Gpt4oMini,
    #[serde(rename = "gpt-4o")]
    Gpt4o,
    #[serde(rename = "claude-3-5-haiku")]
    Claude35Haiku,
    #[serde(rename = "claude-sonnet-4")]
    ClaudeSonnet4,
    #[serde(rename = "gemini-2.0-flash")]
    Gemini20Flash,
}

impl ModelId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelId::Gpt4oMini => "gpt-4o-mini",
            ModelId::Gpt4o => "gpt-4o",
            ModelId::Claude35Haiku => "claude-3-5-haiku",
            ModelId::ClaudeSonnet4 => "claude-sonnet-4",
            ModelId::Gemini20Flash => "gemini-2.0-flash",
        }
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModelId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gpt-4o-mini" => Ok(ModelId::Gpt4oMini),
            "gpt-4o" => Ok(ModelId::Gpt4o),
            "claude-3-5-haiku" => Ok(ModelId::Claude35Haiku),
            "claude-sonnet-4" => Ok(ModelId::ClaudeSonnet4),
            "gemini-2.0-flash" => Ok(ModelId::Gemini20Flash),
            _ => Err(format!("Unknown model: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiTier {
    /// L2 triage.
    Screening,
    /// L3 analysis.
    DeepReview,
}

impl AiTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiTier::Screening => "screening",
            AiTier::DeepReview => "deep_review",
        }
    }
}

impl std::fmt::Display for AiTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
