//! Tests for database creation and schema setup

use scribe_common::db::{create_schema, init_database};
use tempfile::TempDir;

async fn table_names(pool: &sqlx::SqlitePool) -> Vec<String> {
    sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
        .fetch_all(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("podcasts.db");

    let result = init_database(&db_path, 2).await;
    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");

    let tables = table_names(&result.unwrap()).await;
    for expected in ["podcasts", "training_session_items", "training_sessions"] {
        assert!(tables.iter().any(|t| t == expected), "missing table {}", expected);
    }
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("podcasts.db");

    let first = init_database(&db_path, 2).await.unwrap();
    sqlx::query("INSERT INTO podcasts (podcast_title, language) VALUES ('Show', 'en')")
        .execute(&first)
        .await
        .unwrap();
    first.close().await;

    let second = init_database(&db_path, 2).await.unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM podcasts")
        .fetch_one(&second)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_schema_creation_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("podcasts.db"), 2).await.unwrap();

    create_schema(&pool).await.unwrap();
    create_schema(&pool).await.unwrap();

    let indexes: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'podcasts' \
         AND name NOT LIKE 'sqlite_autoindex%'",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(indexes.len(), 4);
}

#[tokio::test]
async fn test_new_rows_start_unclaimed() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("podcasts.db"), 2).await.unwrap();

    sqlx::query("INSERT INTO podcasts (podcast_title) VALUES ('Show')")
        .execute(&pool)
        .await
        .unwrap();
    let transcript: String = sqlx::query_scalar("SELECT transcript_file FROM podcasts")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(transcript, "");
}
