//! Database initialization
//!
//! Opens (creating if needed) the SQLite catalog and brings the schema up to
//! date. Every statement is idempotent, so startup can run it unconditionally.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Busy timeout applied to every pooled connection
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize database connection pool and create tables if needed
pub async fn init_database(db_path: &Path, max_connections: u32) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // WAL lets readers proceed while one writer holds the lock
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_podcasts_table(pool).await?;
    create_training_sessions_table(pool).await?;
    create_training_session_items_table(pool).await?;
    Ok(())
}

/// Work item catalog
///
/// `transcript_file` holds '' (unclaimed), 'in_progress' (claimed) or the
/// transcript path (completed).
async fn create_podcasts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS podcasts (
            podcast_episode_id INTEGER PRIMARY KEY AUTOINCREMENT,
            podcast_title TEXT,
            episode_title TEXT,
            published_date TEXT,
            retrieval_time REAL,
            authors TEXT,
            language TEXT,
            description TEXT,
            keywords TEXT,
            episode_url TEXT,
            episode_audio_url TEXT,
            cache_audio_url TEXT,
            cache_audio_file TEXT,
            transcript_file TEXT NOT NULL DEFAULT '',
            duration REAL,
            type TEXT,
            episode_json TEXT,
            model TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    for statement in [
        "CREATE INDEX IF NOT EXISTS idx_podcasts_language_transcript ON podcasts(language, transcript_file)",
        "CREATE INDEX IF NOT EXISTS idx_podcasts_authors ON podcasts(authors)",
        "CREATE INDEX IF NOT EXISTS idx_podcasts_title ON podcasts(podcast_title)",
        "CREATE INDEX IF NOT EXISTS idx_podcasts_duration ON podcasts(duration)",
    ] {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}

/// Durable training session metadata and cursor state
async fn create_training_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS training_sessions (
            session_id TEXT PRIMARY KEY,
            language TEXT NOT NULL,
            batch_size INTEGER NOT NULL,
            sample_order TEXT NOT NULL,
            min_duration REAL NOT NULL DEFAULT 0,
            max_duration REAL,
            num_samples INTEGER NOT NULL DEFAULT 0,
            current_epoch INTEGER NOT NULL DEFAULT 0,
            next_index INTEGER NOT NULL DEFAULT 0,
            batches_served TEXT NOT NULL DEFAULT '[]',
            batches_done TEXT NOT NULL DEFAULT '[]',
            logs TEXT NOT NULL DEFAULT '[]',
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Materialized dataset of each durable session, one row per position
async fn create_training_session_items_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS training_session_items (
            session_id TEXT NOT NULL REFERENCES training_sessions(session_id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            item TEXT NOT NULL,
            PRIMARY KEY (session_id, position)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("catalog.db");

        let pool = init_database(&db_path, 2).await.unwrap();
        create_schema(&pool).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert_eq!(
            names,
            vec!["podcasts", "training_session_items", "training_sessions"]
        );
    }
}
