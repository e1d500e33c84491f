//! Resolution of the AI provider credential.
//!
//! Sources, in priority order:
//!
//! 1. **File reference** - Docker secrets pattern (e.g., `apiKeyFile: /run/secrets/ai_key`)
//! 2. **Env var reference** - Kubernetes/production (e.g., `apiKeyEnv: LOCQA_AI_API_KEY`)
//!
//! The key is never accepted inline in the configuration file.

use secrecy::SecretString;
use std::fs;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need a file path or an env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Secret from {origin} is empty")]
    Empty { origin: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Resolves a secret from a file, falling back to an environment variable.
pub fn resolve_secret(file_path: Option<&str>, env_var: Option<&str>) -> Result<SecretString> {
    if let Some(path) = file_path.filter(|p| !p.is_empty()) {
        let expanded = expand_home(path);
        let content = fs::read_to_string(&expanded).map_err(|e| SecretError::FileReadError {
            path: expanded.clone(),
            source: e,
        })?;
        return non_empty(content.trim(), format!("file '{}'", expanded));
    }

    if let Some(var_name) = env_var.filter(|v| !v.is_empty()) {
        return match std::env::var(var_name) {
            // Env vars may carry trailing newlines
            Ok(value) => non_empty(value.trim(), format!("env var '{}'", var_name)),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: var_name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: var_name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided)
}

fn non_empty(value: &str, origin: String) -> Result<SecretString> {
    if value.is_empty() {
        return Err(SecretError::Empty { origin });
    }
    Ok(SecretString::from(value.to_string()))
}

/// Expands `~` to the user's home directory.
///
/// Only `~` and `~/path` are supported, not `~user/path`.
fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            let home = home.to_string_lossy();
            if path == "~" {
                return home.into_owned();
            }
            return path.replacen('~', &home, 1);
        }
    }
    path.to_string()
}
