//! Training session manager
//!
//! Builds the dataset snapshot from the work item store and forwards cursor
//! operations to the configured [`SessionStore`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    Batch, LogEntry, SessionItem, SessionParams, SessionStatus, SessionStore, SortOrder,
    TrainingSession,
};
use crate::db::{WorkItem, WorkItemStore};
use crate::urls::PublicUrls;
use crate::{Error, Result};

/// Size limits applied to session logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// Messages longer than this many characters are truncated
    pub max_log_message_len: usize,
    /// Log entries kept per session and reported by status
    pub log_tail_len: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_log_message_len: 4000,
            log_tail_len: 25,
        }
    }
}

/// Result of creating a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCreated {
    pub session_id: String,
    pub num_samples: usize,
    pub batch_size: usize,
    pub order: SortOrder,
}

#[derive(Clone)]
pub struct TrainingSessionManager {
    store: Arc<dyn SessionStore>,
    items: WorkItemStore,
    urls: PublicUrls,
    limits: SessionLimits,
}

impl TrainingSessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        items: WorkItemStore,
        urls: PublicUrls,
        limits: SessionLimits,
    ) -> Self {
        Self {
            store,
            items,
            urls,
            limits,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    /// Snapshot the matching completed items and register a new session
    ///
    /// An empty selection still creates the session; `next_batch` then fails
    /// with [`Error::EmptyDataset`].
    pub async fn create(&self, params: SessionParams) -> Result<SessionCreated> {
        params.validate()?;

        let dataset: Vec<SessionItem> = self
            .items
            .training_candidates(&params)
            .await?
            .into_iter()
            .filter_map(|item| self.session_item(item))
            .collect();

        let session = TrainingSession::new(params, dataset);
        let created = SessionCreated {
            session_id: session.session_id.clone(),
            num_samples: session.num_samples(),
            batch_size: session.params.batch_size,
            order: session.params.order,
        };

        self.store.insert(session).await?;
        info!(
            session_id = %created.session_id,
            num_samples = created.num_samples,
            backend = self.store.backend_name(),
            "Started training session"
        );
        Ok(created)
    }

    pub async fn next_batch(&self, session_id: &str) -> Result<Batch> {
        let batch = self.store.next_batch(session_id).await?;
        debug!(
            session_id,
            epoch = batch.epoch,
            batch_id = batch.batch_id,
            items = batch.items.len(),
            "Served training batch"
        );
        Ok(batch)
    }

    pub async fn mark_batch_done(&self, session_id: &str, epoch: u64, batch_id: usize) -> Result<()> {
        self.store.mark_batch_done(session_id, epoch, batch_id).await
    }

    /// Append a client log line, truncating the message to the configured length
    pub async fn append_log(&self, session_id: &str, level: &str, message: &str) -> Result<()> {
        let level = level.trim();
        if level.is_empty() {
            return Err(Error::InvalidInput("log level must not be empty".to_string()));
        }

        let msg: String = message.chars().take(self.limits.max_log_message_len).collect();
        let entry = LogEntry {
            ts: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            level: level.to_ascii_lowercase(),
            msg,
        };
        self.store
            .append_log(session_id, entry, self.limits.log_tail_len)
            .await
    }

    pub async fn status(&self, session_id: &str) -> Result<SessionStatus> {
        self.store.status(session_id, self.limits.log_tail_len).await
    }

    /// Discard a session; `false` when it did not exist
    pub async fn end(&self, session_id: &str) -> Result<bool> {
        let removed = self.store.remove(session_id).await?;
        if removed {
            info!(session_id, "Ended training session");
        }
        Ok(removed)
    }

    fn session_item(&self, item: WorkItem) -> Option<SessionItem> {
        // Only completed items with a known duration reach this point
        let transcript_file = item.transcript.transcript_path()?.to_string();
        let duration = item.duration?;
        Some(SessionItem {
            podcast_episode_id: item.id,
            transcript_file_url: self.urls.transcript_url(&transcript_file),
            local_cache_audio_url: self.urls.local_cache_url(&item.cache_audio_url),
            podcast_title: item.podcast_title,
            episode_title: item.episode_title,
            authors: item.authors,
            language: item.language,
            duration,
            episode_audio_url: item.episode_audio_url,
            cache_audio_url: item.cache_audio_url,
            cache_audio_file: item.cache_audio_file,
            transcript_file,
            model: item.model,
        })
    }
}
