//! Integration tests for training sessions across every store backend
//!
//! The redis backend runs only when SCRIBE_TEST_REDIS_URL points at a server.

mod helpers;

use helpers::{create_test_db, episode, insert_completed};
use scribe_common::db::{DbProxy, WorkItemStore};
use scribe_common::session::{
    MemorySessionStore, SessionLimits, SessionParams, SessionStore, SortOrder,
    SqlSessionStore, TrainingSessionManager,
};
use scribe_common::urls::PublicUrls;
use scribe_common::Error;
use std::sync::Arc;
use tempfile::TempDir;

const LIMITS: SessionLimits = SessionLimits {
    max_log_message_len: 16,
    log_tail_len: 3,
};

fn params(batch_size: usize) -> SessionParams {
    SessionParams {
        language: "en".to_string(),
        batch_size,
        order: SortOrder::Asc,
        min_duration: 0.0,
        max_duration: None,
    }
}

/// Five completed items with durations 10..50, inserted out of order
async fn seeded_db() -> (TempDir, DbProxy) {
    let (dir, db) = create_test_db().await.unwrap();
    let store = WorkItemStore::new(db.clone());
    for duration in [30.0, 50.0, 10.0, 40.0, 20.0] {
        insert_completed(&store, &episode("Alice", "en", duration))
            .await
            .unwrap();
    }
    (dir, db)
}

fn manager(db: &DbProxy, store: Arc<dyn SessionStore>) -> TrainingSessionManager {
    TrainingSessionManager::new(
        store,
        WorkItemStore::new(db.clone()),
        PublicUrls::new("/var/www/", None),
        LIMITS,
    )
}

async fn backends(db: &DbProxy) -> Vec<Arc<dyn SessionStore>> {
    let mut stores: Vec<Arc<dyn SessionStore>> = vec![
        Arc::new(MemorySessionStore::new()),
        Arc::new(SqlSessionStore::new(db.clone())),
    ];
    stores.extend(redis_backend().await);
    stores
}

#[cfg(feature = "redis-sessions")]
async fn redis_backend() -> Option<Arc<dyn SessionStore>> {
    let url = std::env::var("SCRIBE_TEST_REDIS_URL").ok()?;
    let prefix = format!("scribe_test:{}:", uuid::Uuid::new_v4().simple());
    let store = scribe_common::session::RedisSessionStore::connect(&url, &prefix, 60)
        .await
        .unwrap();
    Some(Arc::new(store))
}

#[cfg(not(feature = "redis-sessions"))]
async fn redis_backend() -> Option<Arc<dyn SessionStore>> {
    None
}

#[tokio::test]
async fn test_batches_walk_and_wrap() {
    let (_dir, db) = seeded_db().await;
    for store in backends(&db).await {
        let backend = store.backend_name();
        let sessions = manager(&db, store);
        let created = sessions.create(params(2)).await.unwrap();
        assert_eq!(created.num_samples, 5, "{}", backend);
        assert_eq!(created.session_id.len(), 32);

        let mut served = Vec::new();
        for _ in 0..4 {
            let batch = sessions.next_batch(&created.session_id).await.unwrap();
            let durations: Vec<f64> = batch.items.iter().map(|i| i.duration).collect();
            served.push((batch.batch_id, batch.epoch, durations));
        }

        assert_eq!(
            served,
            vec![
                (0, 0, vec![10.0, 20.0]),
                (2, 0, vec![30.0, 40.0]),
                (4, 0, vec![50.0]),
                (0, 1, vec![10.0, 20.0]),
            ],
            "backend {}",
            backend
        );
    }
}

#[tokio::test]
async fn test_items_carry_public_transcript_url() {
    let (_dir, db) = seeded_db().await;
    let sessions = manager(&db, Arc::new(MemorySessionStore::new()));
    let created = sessions.create(params(1)).await.unwrap();

    let batch = sessions.next_batch(&created.session_id).await.unwrap();
    let item = &batch.items[0];
    assert!(item.transcript_file.starts_with("/var/www/"));
    assert!(item.transcript_file_url.starts_with("https://cache.example/"));
    assert_eq!(item.model.as_deref(), Some("whisper-large"));
    assert!(item.local_cache_audio_url.is_none());
}

#[tokio::test]
async fn test_mark_done_requires_served_batch() {
    let (_dir, db) = seeded_db().await;
    for store in backends(&db).await {
        let backend = store.backend_name();
        let sessions = manager(&db, store);
        let id = sessions.create(params(2)).await.unwrap().session_id;

        assert!(
            matches!(
                sessions.mark_batch_done(&id, 0, 0).await,
                Err(Error::UnknownBatch { epoch: 0, batch_id: 0 })
            ),
            "backend {}",
            backend
        );

        let batch = sessions.next_batch(&id).await.unwrap();
        sessions
            .mark_batch_done(&id, batch.epoch, batch.batch_id)
            .await
            .unwrap();
        sessions
            .mark_batch_done(&id, batch.epoch, batch.batch_id)
            .await
            .unwrap();
        assert!(matches!(
            sessions.mark_batch_done(&id, 1, 0).await,
            Err(Error::UnknownBatch { .. })
        ));

        let status = sessions.status(&id).await.unwrap();
        assert_eq!(status.num_batches_served, 1, "backend {}", backend);
        assert_eq!(status.num_batches_done, 1, "backend {}", backend);
        assert_eq!(status.next_index, 2);
    }
}

#[tokio::test]
async fn test_logs_are_truncated_and_bounded() {
    let (_dir, db) = seeded_db().await;
    for store in backends(&db).await {
        let backend = store.backend_name();
        let sessions = manager(&db, store);
        let id = sessions.create(params(2)).await.unwrap().session_id;

        for i in 0..5 {
            sessions
                .append_log(&id, "INFO", &format!("step {} {}", i, "x".repeat(40)))
                .await
                .unwrap();
        }

        let status = sessions.status(&id).await.unwrap();
        assert_eq!(status.logs.len(), 3, "backend {}", backend);
        assert!(status.logs[0].msg.starts_with("step 2"));
        assert!(status.logs.iter().all(|l| l.msg.chars().count() == 16));
        assert!(status.logs.iter().all(|l| l.level == "info"));
    }
}

#[tokio::test]
async fn test_status_reports_parameters() {
    let (_dir, db) = seeded_db().await;
    let sessions = manager(&db, Arc::new(SqlSessionStore::new(db.clone())));
    let mut p = params(4);
    p.order = SortOrder::Desc;
    p.max_duration = Some(45.0);
    let id = sessions.create(p).await.unwrap().session_id;

    let status = sessions.status(&id).await.unwrap();
    assert_eq!(status.session_id, id);
    assert_eq!(status.language, "en");
    assert_eq!(status.batch_size, 4);
    assert_eq!(status.order, SortOrder::Desc);
    assert_eq!(status.max_duration, Some(45.0));
    assert_eq!(status.num_samples, 4);
    assert_eq!(status.current_epoch, 0);

    let batch = sessions.next_batch(&id).await.unwrap();
    let durations: Vec<f64> = batch.items.iter().map(|i| i.duration).collect();
    assert_eq!(durations, vec![40.0, 30.0, 20.0, 10.0]);
}

#[tokio::test]
async fn test_empty_dataset_fails_at_first_batch() {
    let (_dir, db) = seeded_db().await;
    for store in backends(&db).await {
        let sessions = manager(&db, store);
        let mut p = params(2);
        p.language = "fr".to_string();

        let created = sessions.create(p).await.unwrap();
        assert_eq!(created.num_samples, 0);
        assert!(matches!(
            sessions.next_batch(&created.session_id).await,
            Err(Error::EmptyDataset)
        ));
        assert_eq!(sessions.status(&created.session_id).await.unwrap().num_batches_served, 0);
    }
}

#[tokio::test]
async fn test_end_removes_session() {
    let (_dir, db) = seeded_db().await;
    for store in backends(&db).await {
        let backend = store.backend_name();
        let sessions = manager(&db, store);
        let id = sessions.create(params(2)).await.unwrap().session_id;
        sessions.next_batch(&id).await.unwrap();

        assert!(sessions.end(&id).await.unwrap(), "backend {}", backend);
        assert!(!sessions.end(&id).await.unwrap(), "backend {}", backend);
        assert!(matches!(
            sessions.next_batch(&id).await,
            Err(Error::UnknownSession(_))
        ));
        assert!(matches!(sessions.status(&id).await, Err(Error::UnknownSession(_))));
        assert!(matches!(
            sessions.append_log(&id, "info", "late").await,
            Err(Error::UnknownSession(_))
        ));
    }
}

#[tokio::test]
async fn test_invalid_parameters_are_rejected() {
    let (_dir, db) = seeded_db().await;
    let sessions = manager(&db, Arc::new(MemorySessionStore::new()));
    assert!(matches!(
        sessions.create(params(0)).await,
        Err(Error::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_snapshot_ignores_later_transcripts() {
    let (_dir, db) = seeded_db().await;
    let sessions = manager(&db, Arc::new(MemorySessionStore::new()));
    let id = sessions.create(params(10)).await.unwrap().session_id;

    insert_completed(&WorkItemStore::new(db.clone()), &episode("Bob", "en", 15.0))
        .await
        .unwrap();

    assert_eq!(sessions.next_batch(&id).await.unwrap().items.len(), 5);
    assert_eq!(sessions.create(params(10)).await.unwrap().num_samples, 6);
}

#[tokio::test]
async fn test_sql_sessions_survive_a_new_store() {
    let (_dir, db) = seeded_db().await;
    let first = manager(&db, Arc::new(SqlSessionStore::new(db.clone())));
    let id = first.create(params(2)).await.unwrap().session_id;
    first.next_batch(&id).await.unwrap();
    first.append_log(&id, "warn", "loss spiked").await.unwrap();

    let second = manager(&db, Arc::new(SqlSessionStore::new(db.clone())));
    let batch = second.next_batch(&id).await.unwrap();
    assert_eq!(batch.batch_id, 2);

    let status = second.status(&id).await.unwrap();
    assert_eq!(status.num_batches_served, 2);
    assert_eq!(status.logs.len(), 1);
    assert_eq!(status.logs[0].level, "warn");
}
