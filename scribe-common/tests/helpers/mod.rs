//! Shared fixtures for the scribe-common integration tests

#![allow(dead_code)]

use anyhow::Result;
use scribe_common::db::{init_database, DbProxy, NewWorkItem, WorkItemStore};
use tempfile::TempDir;

/// Temporary database with the schema applied
///
/// The TempDir must be kept alive for the duration of the test
pub async fn create_test_db() -> Result<(TempDir, DbProxy)> {
    let temp_dir = TempDir::new()?;
    let pool = init_database(&temp_dir.path().join("podcasts.db"), 10).await?;
    Ok((temp_dir, DbProxy::new(pool)))
}

pub fn episode(authors: &str, language: &str, duration: f64) -> NewWorkItem {
    let slug = format!("{}-{}", authors.to_lowercase().replace(' ', "-"), duration);
    NewWorkItem {
        podcast_title: format!("{} Show", authors),
        episode_title: format!("Episode {}", slug),
        authors: authors.to_string(),
        language: language.to_string(),
        episode_audio_url: format!("https://origin.example/{}.mp3", slug),
        cache_audio_url: format!("https://cache.example/audio/{}.mp3", slug),
        cache_audio_file: Some(format!("/var/www/cache.example/audio/{}.mp3", slug)),
        duration: Some(duration),
        ..Default::default()
    }
}

/// Insert an item and walk it through claim and completion
pub async fn insert_completed(store: &WorkItemStore, item: &NewWorkItem) -> Result<i64> {
    let id = store.insert(item).await?;
    store.claim(id).await?;
    let path = item
        .cache_audio_file
        .as_deref()
        .map(|p| p.replace(".mp3", ".vtt"))
        .unwrap_or_else(|| format!("/var/www/transcripts/{}.vtt", id));
    store.complete(id, &path, Some("whisper-large")).await?;
    Ok(id)
}
