//! Database models
//!
//! Rows are mapped field by field into typed records here. The text column
//! `transcript_file` is only interpreted at this boundary; everywhere else the
//! lifecycle is the [`TranscriptState`] enum.

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};
use std::collections::BTreeMap;
use std::fmt;

/// Persisted marker for a claimed item
pub const IN_PROGRESS_SENTINEL: &str = "in_progress";

/// Lifecycle of one work item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "path", rename_all = "snake_case")]
pub enum TranscriptState {
    /// No worker has claimed the item
    Unclaimed,
    /// A worker claimed the item and has not finished
    InProgress,
    /// Transcript stored at the given path
    Completed(String),
}

impl TranscriptState {
    /// Decode the persisted column value
    pub fn from_column(value: &str) -> Self {
        match value {
            "" => TranscriptState::Unclaimed,
            IN_PROGRESS_SENTINEL => TranscriptState::InProgress,
            path => TranscriptState::Completed(path.to_string()),
        }
    }

    /// Encode for the persisted column
    pub fn as_column(&self) -> &str {
        match self {
            TranscriptState::Unclaimed => "",
            TranscriptState::InProgress => IN_PROGRESS_SENTINEL,
            TranscriptState::Completed(path) => path,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TranscriptState::Unclaimed => "unclaimed",
            TranscriptState::InProgress => "in_progress",
            TranscriptState::Completed(_) => "completed",
        }
    }

    pub fn transcript_path(&self) -> Option<&str> {
        match self {
            TranscriptState::Completed(path) => Some(path),
            _ => None,
        }
    }
}

/// One transcribable podcast episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: i64,
    pub podcast_title: String,
    pub episode_title: String,
    pub published_date: Option<String>,
    /// Grouping key used for fair allocation
    pub authors: String,
    pub language: String,
    pub description: Option<String>,
    pub episode_url: Option<String>,
    /// Remote source of the audio
    pub episode_audio_url: String,
    /// Mirror of the audio on the distribution host
    pub cache_audio_url: String,
    /// Local path of the mirrored audio file
    pub cache_audio_file: Option<String>,
    pub transcript: TranscriptState,
    /// Seconds; `None` when unknown or not validated (negative in storage)
    pub duration: Option<f64>,
    pub episode_json: Option<serde_json::Value>,
    /// Model that produced the transcript
    pub model: Option<String>,
}

impl<'r> FromRow<'r, SqliteRow> for WorkItem {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let transcript: Option<String> = row.try_get("transcript_file")?;
        let duration: Option<f64> = row.try_get("duration")?;
        let episode_json: Option<String> = row.try_get("episode_json")?;

        Ok(WorkItem {
            id: row.try_get("podcast_episode_id")?,
            podcast_title: row
                .try_get::<Option<String>, _>("podcast_title")?
                .unwrap_or_default(),
            episode_title: row
                .try_get::<Option<String>, _>("episode_title")?
                .unwrap_or_default(),
            published_date: row.try_get("published_date")?,
            authors: row.try_get::<Option<String>, _>("authors")?.unwrap_or_default(),
            language: row.try_get::<Option<String>, _>("language")?.unwrap_or_default(),
            description: row.try_get("description")?,
            episode_url: row.try_get("episode_url")?,
            episode_audio_url: row
                .try_get::<Option<String>, _>("episode_audio_url")?
                .unwrap_or_default(),
            cache_audio_url: row
                .try_get::<Option<String>, _>("cache_audio_url")?
                .unwrap_or_default(),
            cache_audio_file: row
                .try_get::<Option<String>, _>("cache_audio_file")?
                .filter(|path| !path.is_empty()),
            transcript: TranscriptState::from_column(transcript.as_deref().unwrap_or("")),
            duration: duration.filter(|d| *d >= 0.0),
            // Malformed metadata blobs are dropped rather than failing the whole row
            episode_json: episode_json.and_then(|raw| serde_json::from_str(&raw).ok()),
            model: row.try_get("model")?,
        })
    }
}

/// Fields supplied by the ingestion side when an episode is discovered
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewWorkItem {
    pub podcast_title: String,
    pub episode_title: String,
    pub published_date: Option<String>,
    pub authors: String,
    pub language: String,
    pub description: Option<String>,
    pub episode_url: Option<String>,
    pub episode_audio_url: String,
    pub cache_audio_url: String,
    pub cache_audio_file: Option<String>,
    pub duration: Option<f64>,
    pub episode_json: Option<serde_json::Value>,
}

/// Completion record for one item of a batch upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedTranscript {
    pub id: i64,
    pub transcript_path: String,
    pub model: Option<String>,
}

/// Podcast title with its number of transcribed episodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub title: String,
    pub episode_count: i64,
}

/// Why an id disqualified a batch transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disqualification {
    AlreadyInProgress,
    AlreadyTranscribed,
    NotInProgress,
    MissingCachePath,
    NotFound,
}

impl fmt::Display for Disqualification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Disqualification::AlreadyInProgress => "already in progress",
            Disqualification::AlreadyTranscribed => "already transcribed",
            Disqualification::NotInProgress => "not in progress",
            Disqualification::MissingCachePath => "missing cache audio path",
            Disqualification::NotFound => "not found",
        };
        f.write_str(text)
    }
}

/// Per-reason buckets of ids that disqualified a batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchErrors(pub BTreeMap<Disqualification, Vec<i64>>);

impl BatchErrors {
    pub fn push(&mut self, reason: Disqualification, id: i64) {
        self.0.entry(reason).or_default().push(id);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ids(&self, reason: Disqualification) -> &[i64] {
        self.0.get(&reason).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total number of disqualified ids
    pub fn len(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }
}

impl fmt::Display for BatchErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(reason, ids)| format!("{}: {:?}", reason, ids))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}
