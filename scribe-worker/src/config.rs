//! Worker configuration
//!
//! Resolution order: CLI flag, `SCRIBE_WORKER_*` environment variable,
//! TOML file (`--config` or `SCRIBE_WORKER_CONFIG`), compiled default.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::backoff::BackoffPolicy;

pub const CONFIG_ENV_VAR: &str = "SCRIBE_WORKER_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub server_url: String,
    pub api_key: String,
    pub language: String,
    /// Model identifier sent with each upload
    pub model: String,
    /// Transcriber program followed by its arguments
    pub command: Vec<String>,
    /// Fetch audio from the LAN-local cache URL
    pub use_local_url: bool,
    /// Stop after this many completed jobs
    pub max_jobs: Option<u64>,
    pub backoff: BackoffPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:6000".to_string(),
            api_key: String::new(),
            language: "en".to_string(),
            model: "whisper-small".to_string(),
            command: Vec::new(),
            use_local_url: false,
            max_jobs: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl WorkerConfig {
    pub fn load(cli_config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = cli_config_path
            .map(Path::to_path_buf)
            .or_else(|| env_value(CONFIG_ENV_VAR).map(PathBuf::from));

        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::Read { path, source })?;
                Self::from_toml_str(&content)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_value("SCRIBE_WORKER_SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = env_value("SCRIBE_WORKER_API_KEY") {
            self.api_key = v;
        }
        if let Some(v) = env_value("SCRIBE_WORKER_LANGUAGE") {
            self.language = v;
        }
        if let Some(v) = env_value("SCRIBE_WORKER_MODEL") {
            self.model = v;
        }
        if let Some(v) = env_value("SCRIBE_WORKER_MAX_JOBS") {
            let jobs = v.parse().map_err(|_| {
                ConfigError::Invalid(format!("SCRIBE_WORKER_MAX_JOBS is not a number: {}", v))
            })?;
            self.max_jobs = Some(jobs);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("api_key must be set".to_string()));
        }
        if self.language.trim().is_empty() {
            return Err(ConfigError::Invalid("language must be set".to_string()));
        }
        if self.command.is_empty() {
            return Err(ConfigError::Invalid(
                "command must name the transcriber program".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = WorkerConfig::from_toml_str(
            r#"
            api_key = "secret"
            language = "de"
            command = ["whisper-cli", "{audio}"]

            [backoff]
            kind = "fixed"
            delay_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.language, "de");
        assert_eq!(config.server_url, "http://127.0.0.1:6000");
        assert_eq!(config.backoff, BackoffPolicy::Fixed { delay_ms: 500 });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_key_and_command() {
        let mut config = WorkerConfig::default();
        assert!(config.validate().is_err());

        config.api_key = "k".to_string();
        assert!(config.validate().is_err());

        config.command = vec!["whisper".to_string()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            WorkerConfig::from_toml_str("language = ["),
            Err(ConfigError::Parse(_))
        ));
    }
}
