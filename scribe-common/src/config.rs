//! Configuration loading and resolution
//!
//! Each setting resolves in priority order:
//! 1. Command-line argument (highest priority, applied by the binary)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! The config file itself is located via `--config`, then `SCRIBE_CONFIG`,
//! then `~/.config/scribe/config.toml`, then `/etc/scribe/config.toml`.
//! A missing file is not an error; defaults apply.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

use crate::{Error, Result};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "SCRIBE_CONFIG";

/// Which backend holds training session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    /// Process memory; fastest, lost on restart
    #[default]
    Memory,
    /// External cache with a time-to-live; shared across server instances
    Redis,
    /// Relational store; survives restarts
    Sql,
}

impl FromStr for SessionBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(SessionBackend::Memory),
            "redis" => Ok(SessionBackend::Redis),
            "sql" | "pg" | "sqlite" => Ok(SessionBackend::Sql),
            other => Err(Error::Config(format!("unknown session backend '{}'", other))),
        }
    }
}

/// Rewrite of remote cache URLs into LAN-local URLs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUrlRewrite {
    pub remote_prefix: String,
    pub local_prefix: String,
}

/// Data server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_host: String,
    pub port: u16,
    pub database_path: PathBuf,
    pub max_connections: u32,
    /// Shared secret every request must present
    pub api_secret_key: String,
    pub session_backend: SessionBackend,
    pub redis_url: Option<String>,
    pub redis_prefix: String,
    pub session_ttl_secs: u64,
    /// Path prefix replaced by `https://` to form public transcript URLs
    pub transcript_file_replace_prefix: String,
    /// Extension of transcripts written by single uploads
    pub transcript_extension: String,
    pub local_url: Option<LocalUrlRewrite>,
    pub max_log_message_len: usize,
    pub log_tail_len: usize,
    pub max_work_batch: usize,
    /// Group re-sampling attempts when a sampled group drains mid-allocation
    pub group_retry_attempts: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_host: "127.0.0.1".to_string(),
            port: 6000,
            database_path: default_data_dir().join("podcasts.db"),
            max_connections: 10,
            api_secret_key: String::new(),
            session_backend: SessionBackend::Memory,
            redis_url: None,
            redis_prefix: "training_session:".to_string(),
            session_ttl_secs: 3600,
            transcript_file_replace_prefix: "/var/www/".to_string(),
            transcript_extension: "vtt".to_string(),
            local_url: None,
            max_log_message_len: 4000,
            log_tail_len: 25,
            max_work_batch: 256,
            group_retry_attempts: 3,
        }
    }
}

impl ServerConfig {
    /// Load from the resolved config file, then apply environment overrides
    pub fn load(cli_config_path: Option<&Path>) -> Result<Self> {
        let mut config = match locate_config_file(cli_config_path) {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(&path)?
            }
            None => {
                warn!("No config file found, using compiled defaults");
                Self::default()
            }
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Parse a TOML file; fields not present keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("invalid TOML: {}", e)))
    }

    /// `SCRIBE_*` environment variables override file values
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(v) = env_value("SCRIBE_LISTEN_HOST") {
            self.listen_host = v;
        }
        if let Some(v) = env_value("SCRIBE_PORT") {
            self.port = v
                .parse()
                .map_err(|_| Error::Config(format!("SCRIBE_PORT is not a port: {}", v)))?;
        }
        if let Some(v) = env_value("SCRIBE_DATABASE") {
            self.database_path = PathBuf::from(v);
        }
        if let Some(v) = env_value("SCRIBE_API_SECRET_KEY") {
            self.api_secret_key = v;
        }
        if let Some(v) = env_value("SCRIBE_SESSION_BACKEND") {
            self.session_backend = v.parse()?;
        }
        if let Some(v) = env_value("SCRIBE_REDIS_URL") {
            self.redis_url = Some(v);
        }
        Ok(())
    }

    /// Reject configurations the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.api_secret_key.trim().is_empty() {
            return Err(Error::Config("api_secret_key must be set".to_string()));
        }
        if self.session_backend == SessionBackend::Redis && self.redis_url.is_none() {
            return Err(Error::Config(
                "session_backend = \"redis\" requires redis_url".to_string(),
            ));
        }
        if self.max_work_batch == 0 || self.log_tail_len == 0 || self.max_log_message_len == 0 {
            return Err(Error::Config(
                "max_work_batch, log_tail_len and max_log_message_len must be positive".to_string(),
            ));
        }
        if self.session_ttl_secs == 0 {
            return Err(Error::Config("session_ttl_secs must be positive".to_string()));
        }
        Ok(())
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Find the config file: explicit path, env var, user config, system config
pub fn locate_config_file(cli_config_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_config_path {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env_value(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }

    let user_config = dirs::config_dir().map(|d| d.join("scribe").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/scribe/config.toml");
    if system_config.exists() {
        return Some(system_config);
    }
    None
}

/// OS-dependent default data folder
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("scribe"))
        .unwrap_or_else(|| PathBuf::from("./scribe_data"))
}
