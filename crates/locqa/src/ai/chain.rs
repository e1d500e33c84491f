//! Ordered fallback over models.

use std::time::Duration;

use tracing::{debug, warn};

use super::model::{AiTier, ModelId};
use super::prompt::extract_json;
use super::provider::{AiError, AiProvider, TierRequest};
use crate::error::{ConfigError, PipelineError};

/// Retry behaviour inside a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainPolicy {
    /// Calls per model before falling back, for transient failures only.
    pub attempts_per_model: u32,
    /// Pause between calls to the same model.
    pub retry_delay: Duration,
}

impl Default for ChainPolicy {
    fn default() -> Self {
        Self {
            attempts_per_model: 2,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// A tier's explicit model list, tried in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelChain {
    tier: AiTier,
    models: Vec<ModelId>,
}

impl ModelChain {
    pub fn new(tier: AiTier, models: Vec<ModelId>) -> Result<Self, ConfigError> {
        if models.is_empty() {
            return Err(ConfigError::InvalidModelChain {
                tier: tier.to_string(),
                reason: "chain must name at least one model".to_string(),
            });
        }
        for (i, model) in models.iter().enumerate() {
            if models[..i].contains(model) {
                return Err(ConfigError::InvalidModelChain {
                    tier: tier.to_string(),
                    reason: format!("model '{}' listed twice", model),
                });
            }
        }
        Ok(Self { tier, models })
    }

    pub fn tier(&self) -> AiTier {
        self.tier
    }

    pub fn models(&self) -> &[ModelId] {
        &self.models
    }

    pub fn primary(&self) -> ModelId {
        self.models[0]
    }

    /// Runs `request` through the chain until a model returns output that
    /// `parse` accepts.
    ///
    /// Transient errors retry the same model up to the policy limit. Fatal
    /// errors and malformed output move straight to the next model. When every
    /// model fails the result is `Fatal` only if every model failed fatally;
    /// otherwise it is `TransientProvider` and the stage retries later.
    pub async fn invoke<T, F>(
        &self,
        provider: &dyn AiProvider,
        request: &TierRequest,
        policy: &ChainPolicy,
        parse: F,
    ) -> Result<T, PipelineError>
    where
        F: Fn(&str) -> Result<T, String>,
    {
        let mut failures: Vec<String> = Vec::with_capacity(self.models.len());
        let mut all_fatal = true;

        for model in &self.models {
            let attempts = policy.attempts_per_model.max(1);
            for attempt in 1..=attempts {
                debug!(tier = %self.tier, model = %model, attempt, "Invoking model");

                let outcome = match provider.invoke(*model, request).await {
                    Ok(raw) => parse(extract_json(&raw)).map_err(AiError::Malformed),
                    Err(e) => Err(e),
                };

                match outcome {
                    Ok(value) => return Ok(value),
                    Err(AiError::Transient(reason)) if attempt < attempts => {
                        warn!(tier = %self.tier, model = %model, attempt, %reason, "Transient model failure, retrying");
                        tokio::time::sleep(policy.retry_delay).await;
                    }
                    Err(err) => {
                        if !matches!(err, AiError::Fatal(_)) {
                            all_fatal = false;
                        }
                        warn!(tier = %self.tier, model = %model, error = %err, "Model failed, falling back");
                        failures.push(format!("{}: {}", model, err));
                        break;
                    }
                }
            }
        }

        let summary = failures.join("; ");
        if all_fatal {
            Err(PipelineError::Fatal(format!(
                "all {} models failed: {}",
                self.tier, summary
            )))
        } else {
            Err(PipelineError::TransientProvider(format!(
                "all {} models failed: {}",
                self.tier, summary
            )))
        }
    }
}
