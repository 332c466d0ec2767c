//! Request and response bodies of the coordination API
//!
//! Shared by the data server, which serializes them, and the worker client,
//! which deserializes them. Every response carries `success`.

use serde::{Deserialize, Serialize};

use crate::db::{BatchErrors, GroupSummary, WorkItem};
use crate::session::{SessionItem, SessionParams, SessionStatus, SortOrder};
use crate::urls::PublicUrls;

// ========================================
// Generic envelopes
// ========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }

    pub fn with(success: bool) -> Self {
        Self { success }
    }
}

/// Machine-readable code plus human-readable message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// Body of every failed request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetail,
    /// Per-reason id buckets of a rejected batch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<BatchErrors>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
            },
            errors: None,
        }
    }

    pub fn with_buckets(mut self, errors: BatchErrors) -> Self {
        self.errors = Some(errors);
        self
    }
}

// ========================================
// Work allocation
// ========================================

/// What a worker needs to fetch and transcribe one episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkAssignment {
    pub podcast_episode_id: i64,
    pub podcast_title: String,
    pub episode_title: String,
    pub authors: String,
    pub language: String,
    pub episode_audio_url: String,
    pub cache_audio_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_cache_audio_url: Option<String>,
    pub duration: Option<f64>,
}

impl WorkAssignment {
    pub fn from_item(item: WorkItem, urls: &PublicUrls) -> Self {
        Self {
            local_cache_audio_url: urls.local_cache_url(&item.cache_audio_url),
            podcast_episode_id: item.id,
            podcast_title: item.podcast_title,
            episode_title: item.episode_title,
            authors: item.authors,
            language: item.language,
            episode_audio_url: item.episode_audio_url,
            cache_audio_url: item.cache_audio_url,
            duration: item.duration,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkResponse {
    pub success: bool,
    pub work: WorkAssignment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkBatchResponse {
    pub success: bool,
    pub items: Vec<WorkAssignment>,
}

/// Query of `get_work_batch`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkBatchQuery {
    pub n: usize,
    #[serde(default)]
    pub min_duration: f64,
}

/// Ids of a batch claim or cancel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdsRequest {
    pub wids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdsResponse {
    pub success: bool,
    pub updated: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadBatchItem {
    pub wid: i64,
    /// Transcript already written by the worker to shared storage
    pub file_path: String,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadBatchRequest {
    pub items: Vec<UploadBatchItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadBatchResponse {
    pub success: bool,
    pub uploaded: Vec<i64>,
}

/// Response of a single upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub transcript_file: String,
}

// ========================================
// Catalog
// ========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupListResponse {
    pub success: bool,
    pub podcasts: Vec<GroupSummary>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EpisodeQuery {
    pub title: String,
}

/// A transcribed episode with its public transcript URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    pub podcast_episode_id: i64,
    pub podcast_title: String,
    pub episode_title: String,
    pub published_date: Option<String>,
    pub authors: String,
    pub language: String,
    pub description: Option<String>,
    pub episode_url: Option<String>,
    pub episode_audio_url: String,
    pub cache_audio_url: String,
    pub duration: Option<f64>,
    pub transcript_file: String,
    pub transcript_file_url: String,
    pub model: Option<String>,
}

impl EpisodeRecord {
    /// `None` for items without a transcript
    pub fn from_item(item: WorkItem, urls: &PublicUrls) -> Option<Self> {
        let transcript_file = item.transcript.transcript_path()?.to_string();
        Some(Self {
            transcript_file_url: urls.transcript_url(&transcript_file),
            podcast_episode_id: item.id,
            podcast_title: item.podcast_title,
            episode_title: item.episode_title,
            published_date: item.published_date,
            authors: item.authors,
            language: item.language,
            description: item.description,
            episode_url: item.episode_url,
            episode_audio_url: item.episode_audio_url,
            cache_audio_url: item.cache_audio_url,
            duration: item.duration,
            transcript_file,
            model: item.model,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeListResponse {
    pub success: bool,
    pub title: String,
    pub episodes: Vec<EpisodeRecord>,
}

// ========================================
// Training sessions
// ========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartSessionRequest {
    pub language: String,
    pub batch_size: usize,
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default)]
    pub min_duration: f64,
    #[serde(default)]
    pub max_duration: Option<f64>,
}

impl From<StartSessionRequest> for SessionParams {
    fn from(req: StartSessionRequest) -> Self {
        SessionParams {
            language: req.language,
            batch_size: req.batch_size,
            order: req.order,
            min_duration: req.min_duration,
            max_duration: req.max_duration,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStartedResponse {
    pub success: bool,
    pub session_id: String,
    pub num_samples: usize,
    pub batch_size: usize,
    pub order: SortOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextBatchResponse {
    pub success: bool,
    pub batch_id: usize,
    pub epoch: u64,
    pub items: Vec<SessionItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkDoneRequest {
    pub batch_id: usize,
    pub epoch: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRequest {
    #[serde(default = "default_log_level")]
    pub level: String,
    pub message: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatusResponse {
    pub success: bool,
    #[serde(flatten)]
    pub status: SessionStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Disqualification, TranscriptState};

    fn item(transcript: TranscriptState) -> WorkItem {
        WorkItem {
            id: 7,
            podcast_title: "Show".to_string(),
            episode_title: "Ep".to_string(),
            published_date: None,
            authors: "Host".to_string(),
            language: "en".to_string(),
            description: None,
            episode_url: None,
            episode_audio_url: "https://origin/ep.mp3".to_string(),
            cache_audio_url: "https://cache.example/audio/ep.mp3".to_string(),
            cache_audio_file: Some("/var/www/cache.example/audio/ep.mp3".to_string()),
            transcript,
            duration: Some(12.5),
            episode_json: None,
            model: None,
        }
    }

    #[test]
    fn test_error_response_omits_empty_buckets() {
        let body = serde_json::to_value(ErrorResponse::new("CONFLICT", "taken")).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "CONFLICT");
        assert!(body.get("errors").is_none());
    }

    #[test]
    fn test_error_response_buckets_use_reason_keys() {
        let mut buckets = BatchErrors::default();
        buckets.push(Disqualification::AlreadyInProgress, 3);
        let body = serde_json::to_value(
            ErrorResponse::new("BATCH_REJECTED", "rejected").with_buckets(buckets),
        )
        .unwrap();
        assert_eq!(body["errors"]["already_in_progress"], serde_json::json!([3]));
    }

    #[test]
    fn test_episode_record_requires_transcript() {
        let urls = PublicUrls::new("/var/www/", None);
        assert!(EpisodeRecord::from_item(item(TranscriptState::InProgress), &urls).is_none());

        let record = EpisodeRecord::from_item(
            item(TranscriptState::Completed(
                "/var/www/cache.example/audio/ep.vtt".to_string(),
            )),
            &urls,
        )
        .unwrap();
        assert_eq!(
            record.transcript_file_url,
            "https://cache.example/audio/ep.vtt"
        );
    }

    #[test]
    fn test_start_request_defaults() {
        let req: StartSessionRequest =
            serde_json::from_str(r#"{"language":"en","batch_size":4}"#).unwrap();
        let params = SessionParams::from(req);
        assert_eq!(params.order, SortOrder::Asc);
        assert_eq!(params.min_duration, 0.0);
        assert!(params.max_duration.is_none());
    }
}
