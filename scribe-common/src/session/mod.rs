//! Training sessions
//!
//! A training session is a cursor over a snapshot of completed work items,
//! filtered by language and duration and sorted by duration (curriculum
//! order). The snapshot is taken once at creation; new transcripts need a new
//! session.
//!
//! Session state lives behind [`SessionStore`]. All backends implement the
//! same transitions from [`cursor`]; they differ only in durability and in
//! visibility across server processes.
//!
//! Concurrent mutation of one session id by several clients is not a
//! supported pattern: one client drives one session. The backends keep their
//! own data structures consistent, but two clients interleaving
//! `next_batch` calls will split the batches between them.

pub mod cursor;
pub mod manager;
pub mod memory;
#[cfg(feature = "redis-sessions")]
pub mod redis_store;
pub mod sql;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::{ServerConfig, SessionBackend};
use crate::db::DbProxy;
use crate::{Error, Result};

pub use cursor::{BatchKey, BatchSlot, SessionCursor};
pub use manager::{SessionCreated, SessionLimits, TrainingSessionManager};
pub use memory::MemorySessionStore;
pub use sql::SqlSessionStore;
#[cfg(feature = "redis-sessions")]
pub use redis_store::RedisSessionStore;

/// Duration sort order of a session's dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Shortest first
    #[default]
    Asc,
    /// Longest first
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(Error::InvalidInput(format!(
                "sort order must be 'asc' or 'desc', got '{}'",
                other
            ))),
        }
    }
}

/// Selection filter and batching parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionParams {
    pub language: String,
    pub batch_size: usize,
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default)]
    pub min_duration: f64,
    #[serde(default)]
    pub max_duration: Option<f64>,
}

impl SessionParams {
    pub fn validate(&self) -> Result<()> {
        if self.language.trim().is_empty() {
            return Err(Error::InvalidInput("language must not be empty".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidInput("batch_size must be positive".to_string()));
        }
        if !self.min_duration.is_finite() || self.min_duration < 0.0 {
            return Err(Error::InvalidInput(
                "min_duration must be a non-negative number".to_string(),
            ));
        }
        if let Some(max) = self.max_duration {
            if !max.is_finite() || max < self.min_duration {
                return Err(Error::InvalidInput(
                    "max_duration must not be below min_duration".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Snapshot of one completed work item as handed to a training client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionItem {
    pub podcast_episode_id: i64,
    pub podcast_title: String,
    pub episode_title: String,
    pub authors: String,
    pub language: String,
    pub duration: f64,
    pub episode_audio_url: String,
    pub cache_audio_url: String,
    pub cache_audio_file: Option<String>,
    pub transcript_file: String,
    pub transcript_file_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_cache_audio_url: Option<String>,
    pub model: Option<String>,
}

/// One entry of a session's rolling log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unix time in seconds
    pub ts: f64,
    pub level: String,
    pub msg: String,
}

/// A served batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: usize,
    pub epoch: u64,
    pub items: Vec<SessionItem>,
}

/// Everything a status query reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub language: String,
    pub batch_size: usize,
    pub order: SortOrder,
    pub min_duration: f64,
    pub max_duration: Option<f64>,
    pub current_epoch: u64,
    pub next_index: usize,
    pub num_samples: usize,
    pub num_batches_served: usize,
    pub num_batches_done: usize,
    pub logs: Vec<LogEntry>,
}

/// A freshly created session before it is handed to a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSession {
    pub session_id: String,
    pub params: SessionParams,
    pub dataset: Vec<SessionItem>,
    pub cursor: SessionCursor,
}

impl TrainingSession {
    pub fn new(params: SessionParams, dataset: Vec<SessionItem>) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().simple().to_string(),
            params,
            dataset,
            cursor: SessionCursor::default(),
        }
    }

    pub fn num_samples(&self) -> usize {
        self.dataset.len()
    }

    /// Apply `advance` and copy out the served items
    pub fn next_batch(&mut self) -> Result<Batch> {
        let slot = self
            .cursor
            .advance(self.dataset.len(), self.params.batch_size)?;
        Ok(Batch {
            batch_id: slot.batch_id,
            epoch: slot.epoch,
            items: self.dataset[slot.range].to_vec(),
        })
    }
}

/// Storage contract for session state
///
/// Missing session ids fail with [`Error::UnknownSession`], except in
/// [`SessionStore::remove`], which reports absence as `false`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Short backend name for logs
    fn backend_name(&self) -> &'static str;

    /// Persist a newly created session
    async fn insert(&self, session: TrainingSession) -> Result<()>;

    /// Serve the next batch and advance the cursor
    async fn next_batch(&self, session_id: &str) -> Result<Batch>;

    /// Record a served batch as done
    async fn mark_batch_done(&self, session_id: &str, epoch: u64, batch_id: usize) -> Result<()>;

    /// Append to the rolling log, keeping at most `capacity` entries
    async fn append_log(&self, session_id: &str, entry: LogEntry, capacity: usize) -> Result<()>;

    /// Status including the newest `log_tail` log entries
    async fn status(&self, session_id: &str, log_tail: usize) -> Result<SessionStatus>;

    /// Drop all state of a session; `false` when it did not exist
    async fn remove(&self, session_id: &str) -> Result<bool>;
}

/// Build the store selected by configuration
pub async fn build_session_store(
    config: &ServerConfig,
    db: &DbProxy,
) -> Result<Arc<dyn SessionStore>> {
    match config.session_backend {
        SessionBackend::Memory => Ok(Arc::new(MemorySessionStore::new())),
        SessionBackend::Sql => Ok(Arc::new(SqlSessionStore::new(db.clone()))),
        #[cfg(feature = "redis-sessions")]
        SessionBackend::Redis => {
            let url = config.redis_url.as_deref().ok_or_else(|| {
                Error::Config("redis session backend requires redis_url".to_string())
            })?;
            let store =
                redis_store::RedisSessionStore::connect(url, &config.redis_prefix, config.session_ttl_secs)
                    .await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis-sessions"))]
        SessionBackend::Redis => Err(Error::Config(
            "built without the redis-sessions feature".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SessionParams {
        SessionParams {
            language: "en".to_string(),
            batch_size: 2,
            order: SortOrder::Asc,
            min_duration: 0.0,
            max_duration: None,
        }
    }

    #[test]
    fn test_params_validation() {
        assert!(params().validate().is_ok());

        let mut p = params();
        p.batch_size = 0;
        assert!(p.validate().is_err());

        let mut p = params();
        p.min_duration = 10.0;
        p.max_duration = Some(5.0);
        assert!(p.validate().is_err());

        let mut p = params();
        p.min_duration = -1.0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_sort_order_parsing() {
        assert_eq!("ASC".parse::<SortOrder>().unwrap(), SortOrder::Asc);
        assert_eq!("desc".parse::<SortOrder>().unwrap(), SortOrder::Desc);
        assert!("random".parse::<SortOrder>().is_err());
    }

    #[test]
    fn test_session_id_is_hex() {
        let session = TrainingSession::new(params(), Vec::new());
        assert_eq!(session.session_id.len(), 32);
        assert!(session.session_id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
