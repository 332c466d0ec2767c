//! Redis session store
//!
//! Each session occupies three keys under the configured prefix:
//! - `{prefix}{id}:meta`: parameters and dataset size (JSON)
//! - `{prefix}{id}:dataset`: one JSON item per list element, in dataset order
//! - `{prefix}{id}:cursor`: the [`SessionCursor`] (JSON)
//!
//! All three carry the session TTL, refreshed on every access. Idle sessions
//! expire on their own. Redis may also evict keys one at a time under memory
//! pressure; a session missing any of its keys is deleted and reported as
//! unknown.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::{debug, info, warn};

use super::{
    Batch, LogEntry, SessionCursor, SessionItem, SessionParams, SessionStatus, SessionStore,
    TrainingSession,
};
use crate::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
struct SessionMeta {
    session_id: String,
    params: SessionParams,
    num_samples: usize,
}

/// What is left of a session's keys
#[derive(Debug)]
enum Surviving {
    Missing,
    Partial,
    Whole(SessionMeta, SessionCursor),
}

fn classify(
    meta: Option<String>,
    cursor: Option<String>,
    dataset_len: usize,
) -> Result<Surviving> {
    match (meta, cursor) {
        (None, None) if dataset_len == 0 => Ok(Surviving::Missing),
        (Some(meta), Some(cursor)) => {
            let meta: SessionMeta = serde_json::from_str(&meta)?;
            if meta.num_samples != dataset_len {
                return Ok(Surviving::Partial);
            }
            Ok(Surviving::Whole(meta, serde_json::from_str(&cursor)?))
        }
        _ => Ok(Surviving::Partial),
    }
}

/// Inclusive LRANGE bounds for a half-open item range
fn lrange_bounds(range: &Range<usize>) -> (i64, i64) {
    (range.start as i64, range.end as i64 - 1)
}

pub struct RedisSessionStore {
    conn: ConnectionManager,
    prefix: String,
    ttl_secs: u64,
}

impl RedisSessionStore {
    pub async fn connect(url: &str, prefix: &str, ttl_secs: u64) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!(prefix, ttl_secs, "Connected to redis session store");
        Ok(Self {
            conn,
            prefix: prefix.to_string(),
            ttl_secs,
        })
    }

    fn key(&self, session_id: &str, part: &str) -> String {
        format!("{}{}:{}", self.prefix, session_id, part)
    }

    async fn load(&self, session_id: &str) -> Result<(SessionMeta, SessionCursor)> {
        let mut conn = self.conn.clone();
        let (meta, cursor, dataset_len): (Option<String>, Option<String>, usize) = redis::pipe()
            .atomic()
            .cmd("GET")
            .arg(self.key(session_id, "meta"))
            .cmd("GET")
            .arg(self.key(session_id, "cursor"))
            .cmd("LLEN")
            .arg(self.key(session_id, "dataset"))
            .query_async(&mut conn)
            .await?;

        match classify(meta, cursor, dataset_len)? {
            Surviving::Whole(meta, cursor) => Ok((meta, cursor)),
            Surviving::Missing => Err(Error::UnknownSession(session_id.to_string())),
            Surviving::Partial => Err(self.evicted(session_id).await),
        }
    }

    /// Drop what is left of a partially evicted session
    async fn evicted(&self, session_id: &str) -> Error {
        warn!(session_id, "Session keys partially evicted; discarding session");
        if let Err(e) = self.remove(session_id).await {
            warn!(session_id, error = %e, "Failed to discard evicted session");
        }
        Error::UnknownSession(session_id.to_string())
    }

    /// Write the cursor back and slide the TTL of all session keys
    async fn store_cursor(&self, session_id: &str, cursor: &SessionCursor) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(self.key(session_id, "cursor"))
            .arg(serde_json::to_string(cursor)?)
            .arg("EX")
            .arg(self.ttl_secs)
            .ignore()
            .cmd("EXPIRE")
            .arg(self.key(session_id, "meta"))
            .arg(self.ttl_secs)
            .ignore()
            .cmd("EXPIRE")
            .arg(self.key(session_id, "dataset"))
            .arg(self.ttl_secs)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn touch(&self, session_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for part in ["meta", "dataset", "cursor"] {
            pipe.cmd("EXPIRE")
                .arg(self.key(session_id, part))
                .arg(self.ttl_secs)
                .ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn insert(&self, session: TrainingSession) -> Result<()> {
        let meta = SessionMeta {
            session_id: session.session_id.clone(),
            params: session.params.clone(),
            num_samples: session.num_samples(),
        };
        let items = session
            .dataset
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SET")
            .arg(self.key(&session.session_id, "meta"))
            .arg(serde_json::to_string(&meta)?)
            .arg("EX")
            .arg(self.ttl_secs)
            .ignore()
            .cmd("SET")
            .arg(self.key(&session.session_id, "cursor"))
            .arg(serde_json::to_string(&session.cursor)?)
            .arg("EX")
            .arg(self.ttl_secs)
            .ignore();

        // RPUSH rejects an empty value list
        if !items.is_empty() {
            let dataset_key = self.key(&session.session_id, "dataset");
            pipe.cmd("RPUSH")
                .arg(&dataset_key)
                .arg(items)
                .ignore()
                .cmd("EXPIRE")
                .arg(&dataset_key)
                .arg(self.ttl_secs)
                .ignore();
        }

        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn).await?;

        debug!(session_id = %session.session_id, "Stored session in redis");
        Ok(())
    }

    async fn next_batch(&self, session_id: &str) -> Result<Batch> {
        let (meta, mut cursor) = self.load(session_id).await?;
        let slot = cursor.advance(meta.num_samples, meta.params.batch_size)?;

        let (first, last) = lrange_bounds(&slot.range);
        let mut conn = self.conn.clone();
        let raw: Vec<String> = redis::cmd("LRANGE")
            .arg(self.key(session_id, "dataset"))
            .arg(first)
            .arg(last)
            .query_async(&mut conn)
            .await?;

        // Evicted between the load and the read
        if raw.len() != slot.range.len() {
            return Err(self.evicted(session_id).await);
        }

        let items = raw
            .iter()
            .map(|item| serde_json::from_str::<SessionItem>(item))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        self.store_cursor(session_id, &cursor).await?;

        Ok(Batch {
            batch_id: slot.batch_id,
            epoch: slot.epoch,
            items,
        })
    }

    async fn mark_batch_done(&self, session_id: &str, epoch: u64, batch_id: usize) -> Result<()> {
        let (_, mut cursor) = self.load(session_id).await?;
        cursor.mark_done(epoch, batch_id)?;
        self.store_cursor(session_id, &cursor).await
    }

    async fn append_log(&self, session_id: &str, entry: LogEntry, capacity: usize) -> Result<()> {
        let (_, mut cursor) = self.load(session_id).await?;
        cursor.push_log(entry, capacity);
        self.store_cursor(session_id, &cursor).await
    }

    async fn status(&self, session_id: &str, log_tail: usize) -> Result<SessionStatus> {
        let (meta, cursor) = self.load(session_id).await?;
        self.touch(session_id).await?;
        Ok(cursor.status(&meta.session_id, &meta.params, meta.num_samples, log_tail))
    }

    async fn remove(&self, session_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(self.key(session_id, "meta"))
            .arg(self.key(session_id, "dataset"))
            .arg(self.key(session_id, "cursor"))
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SortOrder;

    fn meta_json(num_samples: usize) -> String {
        serde_json::to_string(&SessionMeta {
            session_id: "s1".to_string(),
            params: SessionParams {
                language: "en".to_string(),
                batch_size: 2,
                order: SortOrder::Asc,
                min_duration: 0.0,
                max_duration: None,
            },
            num_samples,
        })
        .unwrap()
    }

    fn cursor_json() -> String {
        serde_json::to_string(&SessionCursor::default()).unwrap()
    }

    #[test]
    fn test_lrange_bounds_are_inclusive() {
        assert_eq!(lrange_bounds(&(0..2)), (0, 1));
        assert_eq!(lrange_bounds(&(4..5)), (4, 4));

        // Every batch of a 5-item dataset in batches of 2
        let mut cursor = SessionCursor::default();
        let mut covered = Vec::new();
        for _ in 0..3 {
            let slot = cursor.advance(5, 2).unwrap();
            let (first, last) = lrange_bounds(&slot.range);
            covered.extend(first..=last);
        }
        assert_eq!(covered, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_whole_session_loads() {
        let surviving = classify(Some(meta_json(3)), Some(cursor_json()), 3).unwrap();
        assert!(matches!(surviving, Surviving::Whole(meta, _) if meta.num_samples == 3));

        let surviving = classify(Some(meta_json(0)), Some(cursor_json()), 0).unwrap();
        assert!(matches!(surviving, Surviving::Whole(..)));
    }

    #[test]
    fn test_absent_session_is_missing() {
        assert!(matches!(classify(None, None, 0).unwrap(), Surviving::Missing));
    }

    #[test]
    fn test_any_evicted_key_makes_session_partial() {
        let cases = [
            (Some(meta_json(3)), Some(cursor_json()), 0),
            (Some(meta_json(3)), Some(cursor_json()), 2),
            (Some(meta_json(3)), None, 3),
            (None, Some(cursor_json()), 3),
            (None, None, 3),
        ];
        for (meta, cursor, len) in cases {
            assert!(matches!(classify(meta, cursor, len).unwrap(), Surviving::Partial));
        }
    }
}
