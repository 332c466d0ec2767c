//! Relational session store
//!
//! Session metadata and cursor live in `training_sessions`; the dataset is one
//! row per position in `training_session_items`. Every mutation is a scoped
//! transaction, so state survives restarts and never ends up half-written.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::collections::{BTreeSet, VecDeque};
use tracing::debug;

use super::{
    Batch, BatchKey, LogEntry, SessionCursor, SessionItem, SessionParams, SessionStatus,
    SessionStore, SortOrder, TrainingSession,
};
use crate::db::DbProxy;
use crate::{Error, Result};

pub struct SqlSessionStore {
    db: DbProxy,
}

impl SqlSessionStore {
    pub fn new(db: DbProxy) -> Self {
        Self { db }
    }
}

/// Columns of `training_sessions` decoded into typed state
struct SessionRow {
    session_id: String,
    params: SessionParams,
    num_samples: usize,
    cursor: SessionCursor,
}

impl SessionRow {
    fn from_row(row: &SqliteRow) -> Result<Self> {
        let order: String = row.try_get("sample_order")?;
        let batches_served: String = row.try_get("batches_served")?;
        let batches_done: String = row.try_get("batches_done")?;
        let logs: String = row.try_get("logs")?;

        Ok(SessionRow {
            session_id: row.try_get("session_id")?,
            params: SessionParams {
                language: row.try_get("language")?,
                batch_size: row.try_get::<i64, _>("batch_size")? as usize,
                order: order.parse::<SortOrder>()?,
                min_duration: row.try_get("min_duration")?,
                max_duration: row.try_get("max_duration")?,
            },
            num_samples: row.try_get::<i64, _>("num_samples")? as usize,
            cursor: SessionCursor {
                current_epoch: row.try_get::<i64, _>("current_epoch")? as u64,
                next_index: row.try_get::<i64, _>("next_index")? as usize,
                batches_served: serde_json::from_str::<BTreeSet<BatchKey>>(&batches_served)?,
                batches_done: serde_json::from_str::<BTreeSet<BatchKey>>(&batches_done)?,
                logs: serde_json::from_str::<VecDeque<LogEntry>>(&logs)?,
            },
        })
    }
}

async fn load_session(conn: &mut SqliteConnection, session_id: &str) -> Result<SessionRow> {
    let row = sqlx::query(
        "SELECT session_id, language, batch_size, sample_order, min_duration, max_duration, \
         num_samples, current_epoch, next_index, batches_served, batches_done, logs \
         FROM training_sessions WHERE session_id = ?",
    )
    .bind(session_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| Error::UnknownSession(session_id.to_string()))?;

    SessionRow::from_row(&row)
}

#[async_trait]
impl SessionStore for SqlSessionStore {
    fn backend_name(&self) -> &'static str {
        "sql"
    }

    async fn insert(&self, session: TrainingSession) -> Result<()> {
        let encoded: Vec<String> = session
            .dataset
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<_, _>>()?;

        self.db
            .write_transaction("session_insert", move |conn| {
                Box::pin(async move {
                    sqlx::query(
                        r#"
                        INSERT INTO training_sessions (
                            session_id, language, batch_size, sample_order,
                            min_duration, max_duration, num_samples
                        )
                        VALUES (?, ?, ?, ?, ?, ?, ?)
                        "#,
                    )
                    .bind(&session.session_id)
                    .bind(&session.params.language)
                    .bind(session.params.batch_size as i64)
                    .bind(session.params.order.as_str())
                    .bind(session.params.min_duration)
                    .bind(session.params.max_duration)
                    .bind(encoded.len() as i64)
                    .execute(&mut *conn)
                    .await?;

                    for (position, item) in encoded.iter().enumerate() {
                        sqlx::query(
                            "INSERT INTO training_session_items (session_id, position, item) \
                             VALUES (?, ?, ?)",
                        )
                        .bind(&session.session_id)
                        .bind(position as i64)
                        .bind(item)
                        .execute(&mut *conn)
                        .await?;
                    }

                    debug!(session_id = %session.session_id, items = encoded.len(), "Stored session in database");
                    Ok(())
                })
            })
            .await
    }

    async fn next_batch(&self, session_id: &str) -> Result<Batch> {
        let session_id = session_id.to_string();
        self.db
            .write_transaction("session_next_batch", move |conn| {
                Box::pin(async move {
                    let mut session = load_session(conn, &session_id).await?;

                    let slot = session
                        .cursor
                        .advance(session.num_samples, session.params.batch_size)?;

                    let rows: Vec<(String,)> = sqlx::query_as(
                        "SELECT item FROM training_session_items \
                         WHERE session_id = ? AND position >= ? AND position < ? \
                         ORDER BY position",
                    )
                    .bind(&session_id)
                    .bind(slot.range.start as i64)
                    .bind(slot.range.end as i64)
                    .fetch_all(&mut *conn)
                    .await?;

                    let items = rows
                        .iter()
                        .map(|(raw,)| serde_json::from_str::<SessionItem>(raw))
                        .collect::<std::result::Result<Vec<_>, _>>()?;

                    sqlx::query(
                        "UPDATE training_sessions \
                         SET current_epoch = ?, next_index = ?, batches_served = ? \
                         WHERE session_id = ?",
                    )
                    .bind(session.cursor.current_epoch as i64)
                    .bind(session.cursor.next_index as i64)
                    .bind(serde_json::to_string(&session.cursor.batches_served)?)
                    .bind(&session_id)
                    .execute(&mut *conn)
                    .await?;

                    Ok(Batch {
                        batch_id: slot.batch_id,
                        epoch: slot.epoch,
                        items,
                    })
                })
            })
            .await
    }

    async fn mark_batch_done(&self, session_id: &str, epoch: u64, batch_id: usize) -> Result<()> {
        let session_id = session_id.to_string();
        self.db
            .write_transaction("session_mark_done", move |conn| {
                Box::pin(async move {
                    let mut session = load_session(conn, &session_id).await?;
                    session.cursor.mark_done(epoch, batch_id)?;

                    sqlx::query("UPDATE training_sessions SET batches_done = ? WHERE session_id = ?")
                        .bind(serde_json::to_string(&session.cursor.batches_done)?)
                        .bind(&session_id)
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .await
    }

    async fn append_log(&self, session_id: &str, entry: LogEntry, capacity: usize) -> Result<()> {
        let session_id = session_id.to_string();
        self.db
            .write_transaction("session_append_log", move |conn| {
                Box::pin(async move {
                    let mut session = load_session(conn, &session_id).await?;
                    session.cursor.push_log(entry, capacity);

                    sqlx::query("UPDATE training_sessions SET logs = ? WHERE session_id = ?")
                        .bind(serde_json::to_string(&session.cursor.logs)?)
                        .bind(&session_id)
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .await
    }

    async fn status(&self, session_id: &str, log_tail: usize) -> Result<SessionStatus> {
        let mut conn = self.db.autocommit().acquire().await?;
        let session = load_session(&mut conn, session_id).await?;
        Ok(session.cursor.status(
            &session.session_id,
            &session.params,
            session.num_samples,
            log_tail,
        ))
    }

    async fn remove(&self, session_id: &str) -> Result<bool> {
        let session_id = session_id.to_string();
        self.db
            .write_transaction("session_remove", move |conn| {
                Box::pin(async move {
                    sqlx::query("DELETE FROM training_session_items WHERE session_id = ?")
                        .bind(&session_id)
                        .execute(&mut *conn)
                        .await?;
                    let result = sqlx::query("DELETE FROM training_sessions WHERE session_id = ?")
                        .bind(&session_id)
                        .execute(&mut *conn)
                        .await?;
                    Ok(result.rows_affected() > 0)
                })
            })
            .await
    }
}
