use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ai::{AiTier, ChainPolicy, ModelChain, ModelId};
use crate::error::ConfigError;
use crate::scoring::ScoringWeights;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub parity: ParityConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            worker: WorkerConfig::default(),
            retry: RetryConfig::default(),
            scoring: ScoringConfig::default(),
            ai: AiConfig::default(),
            parity: ParityConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// How long an idle worker waits before polling the queue again.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_poll_interval_ms() -> u64 {
    250
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Per-stage retry budget and backoff curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub weights: ScoringWeights,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: f64,
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_sweep_interval_ms() -> u64 {
    60_000
}

fn default_pass_threshold() -> f64 {
    95.0
}

impl ScoringConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            debounce_ms: default_debounce_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            pass_threshold: default_pass_threshold(),
        }
    }
}

/// Which segments the screening tier sees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum L2Scope {
    /// Every segment of the file.
    #[default]
    All,
    /// Only segments with an ambiguous L1 finding.
    L1Flagged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default = "default_screening_chain")]
    pub screening_chain: Vec<ModelId>,
    #[serde(default = "default_deep_review_chain")]
    pub deep_review_chain: Vec<ModelId>,
    #[serde(default = "default_attempts_per_model")]
    pub attempts_per_model: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// OpenAI-compatible base URL, e.g. `https://api.openai.com/v1`.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default)]
    pub l2_scope: L2Scope,
    #[serde(default = "default_screening_batch_size")]
    pub screening_batch_size: usize,
    #[serde(default = "default_deep_review_batch_size")]
    pub deep_review_batch_size: usize,
}

fn default_screening_chain() -> Vec<ModelId> {
    vec![ModelId::Gpt4oMini, ModelId::Gemini20Flash]
}

fn default_deep_review_chain() -> Vec<ModelId> {
    vec![ModelId::ClaudeSonnet4, ModelId::Gpt4o]
}

fn default_attempts_per_model() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> Option<String> {
    Some("LOCQA_AI_API_KEY".to_string())
}

fn default_screening_batch_size() -> usize {
    50
}

fn default_deep_review_batch_size() -> usize {
    20
}

impl AiConfig {
    pub fn screening(&self) -> Result<ModelChain, ConfigError> {
        ModelChain::new(AiTier::Screening, self.screening_chain.clone())
    }

    pub fn deep_review(&self) -> Result<ModelChain, ConfigError> {
        ModelChain::new(AiTier::DeepReview, self.deep_review_chain.clone())
    }

    pub fn chain_policy(&self) -> ChainPolicy {
        ChainPolicy {
            attempts_per_model: self.attempts_per_model,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            screening_chain: default_screening_chain(),
            deep_review_chain: default_deep_review_chain(),
            attempts_per_model: default_attempts_per_model(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_secs: default_timeout_secs(),
            endpoint: default_endpoint(),
            api_key_env: default_api_key_env(),
            api_key_file: None,
            l2_scope: L2Scope::default(),
            screening_batch_size: default_screening_batch_size(),
            deep_review_batch_size: default_deep_review_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParityConfig {
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,
}

fn default_fuzzy_threshold() -> f64 {
    0.8
}

impl Default for ParityConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: default_fuzzy_threshold(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Falls back to `~/.locqa/data/locqa.db` when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path.clone().or_else(crate::db::default_database_path)
    }
}
