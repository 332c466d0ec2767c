//! In-process session store
//!
//! Sessions live in a registry guarded by one lock for create, lookup and
//! delete. Each session sits behind its own mutex, so a long batch copy on one
//! session does not block others. Everything is lost on restart.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::{Batch, LogEntry, SessionStatus, SessionStore, TrainingSession};
use crate::{Error, Result};

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<TrainingSession>>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lookup(&self, session_id: &str) -> Result<Arc<Mutex<TrainingSession>>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::UnknownSession(session_id.to_string()))
    }

    /// Number of live sessions
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, session: TrainingSession) -> Result<()> {
        let id = session.session_id.clone();
        self.sessions
            .write()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(session)));
        debug!(session_id = %id, "Stored session in memory");
        Ok(())
    }

    async fn next_batch(&self, session_id: &str) -> Result<Batch> {
        let session = self.lookup(session_id).await?;
        let mut session = session.lock().await;
        session.next_batch()
    }

    async fn mark_batch_done(&self, session_id: &str, epoch: u64, batch_id: usize) -> Result<()> {
        let session = self.lookup(session_id).await?;
        let mut session = session.lock().await;
        session.cursor.mark_done(epoch, batch_id)
    }

    async fn append_log(&self, session_id: &str, entry: LogEntry, capacity: usize) -> Result<()> {
        let session = self.lookup(session_id).await?;
        let mut session = session.lock().await;
        session.cursor.push_log(entry, capacity);
        Ok(())
    }

    async fn status(&self, session_id: &str, log_tail: usize) -> Result<SessionStatus> {
        let session = self.lookup(session_id).await?;
        let session = session.lock().await;
        Ok(session.cursor.status(
            &session.session_id,
            &session.params,
            session.num_samples(),
            log_tail,
        ))
    }

    async fn remove(&self, session_id: &str) -> Result<bool> {
        Ok(self.sessions.write().await.remove(session_id).is_some())
    }
}
