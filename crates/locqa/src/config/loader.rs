use std::path::Path;

use jsonschema::Draft;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::options()
        .with_draft(Draft::Draft7)
        .build(&schema)
        .map_err(|e| ConfigError::Validation {
            message: format!("Failed to compile JSON schema: {}", e),
        })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| format!("{} at {}", e, e.instance_path()))
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Checks that need more than the schema can express.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.worker.worker_count == 0 {
        return Err(invalid("worker.worker_count must be at least 1"));
    }
    if config.retry.max_attempts == 0 {
        return Err(invalid("retry.max_attempts must be at least 1"));
    }
    if !(config.retry.multiplier >= 1.0) {
        return Err(invalid("retry.multiplier must be at least 1"));
    }

    config
        .scoring
        .weights
        .validate()
        .map_err(|message| ConfigError::Validation {
            message: format!("scoring.weights: {}", message),
        })?;
    if !(0.0..=100.0).contains(&config.scoring.pass_threshold) {
        return Err(invalid("scoring.pass_threshold must be within 0..=100"));
    }

    // Both chains must be explicit, non-empty and duplicate-free
    config.ai.screening()?;
    config.ai.deep_review()?;
    if config.ai.attempts_per_model == 0 {
        return Err(invalid("ai.attempts_per_model must be at least 1"));
    }
    if config.ai.screening_batch_size == 0 || config.ai.deep_review_batch_size == 0 {
        return Err(invalid("ai batch sizes must be at least 1"));
    }

    let threshold = config.parity.fuzzy_threshold;
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(ConfigError::Validation {
            message: format!("parity.fuzzy_threshold must be in (0, 1], got {}", threshold),
        });
    }

    Ok(())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Validation {
        message: message.to_string(),
    }
}
