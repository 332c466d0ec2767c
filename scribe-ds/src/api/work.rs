//! Work allocation and lifecycle endpoints
//!
//! Single transitions answer with `{success: true}`; batch transitions answer
//! with the affected ids or reject the whole batch with per-reason buckets.

use axum::{
    extract::{
        multipart::MultipartRejection, rejection::JsonRejection, rejection::PathRejection,
        rejection::QueryRejection, DefaultBodyLimit, Multipart, Path, Query, State,
    },
    routing::{get, post},
    Json, Router,
};
use std::path::PathBuf;
use tracing::{error, info, warn};
use uuid::Uuid;

use scribe_common::api::{
    IdsRequest, IdsResponse, SuccessResponse, UploadBatchRequest, UploadBatchResponse,
    UploadResponse, WorkAssignment, WorkBatchQuery, WorkBatchResponse, WorkResponse,
};
use scribe_common::db::{CompletedTranscript, TranscriptState};

use crate::{ApiError, ApiResult, AppState};

/// Transcript uploads may be far larger than the default body limit
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// GET /apiv1/get_work/:language/:key
pub async fn get_work(
    State(state): State<AppState>,
    Path((language, _key)): Path<(String, String)>,
) -> ApiResult<Json<WorkResponse>> {
    let item = state.allocator.get_work(&language).await?;
    Ok(Json(WorkResponse {
        success: true,
        work: WorkAssignment::from_item(item, &state.urls),
    }))
}

/// GET /apiv1/get_work_batch/:language/:key?n=&min_duration=
pub async fn get_work_batch(
    State(state): State<AppState>,
    Path((language, _key)): Path<(String, String)>,
    query: Result<Query<WorkBatchQuery>, QueryRejection>,
) -> ApiResult<Json<WorkBatchResponse>> {
    let Query(query) = query?;
    if query.n > state.settings.max_work_batch {
        return Err(ApiError::BadRequest(format!(
            "n must not exceed {}",
            state.settings.max_work_batch
        )));
    }

    let items = state
        .allocator
        .get_work_batch(&language, query.n, query.min_duration)
        .await?
        .into_iter()
        .map(|item| WorkAssignment::from_item(item, &state.urls))
        .collect();

    Ok(Json(WorkBatchResponse {
        success: true,
        items,
    }))
}

/// GET /apiv1/register_wip/:wid/:key
pub async fn register_wip(
    State(state): State<AppState>,
    path: Result<Path<(i64, String)>, PathRejection>,
) -> ApiResult<Json<SuccessResponse>> {
    let Path((wid, _key)) = path?;
    state.items.claim(wid).await?;
    Ok(Json(SuccessResponse::ok()))
}

/// POST /apiv1/register_wip_batch/:key
pub async fn register_wip_batch(
    State(state): State<AppState>,
    payload: Result<Json<IdsRequest>, JsonRejection>,
) -> ApiResult<Json<IdsResponse>> {
    let Json(request) = payload?;
    let updated = state.items.claim_batch(request.wids).await?;
    Ok(Json(IdsResponse {
        success: true,
        updated,
    }))
}

/// GET /apiv1/cancel_work/:wid/:key
pub async fn cancel_work(
    State(state): State<AppState>,
    path: Result<Path<(i64, String)>, PathRejection>,
) -> ApiResult<Json<SuccessResponse>> {
    let Path((wid, _key)) = path?;
    state.items.cancel(wid).await?;
    Ok(Json(SuccessResponse::ok()))
}

/// POST /apiv1/cancel_work_batch/:key
pub async fn cancel_work_batch(
    State(state): State<AppState>,
    payload: Result<Json<IdsRequest>, JsonRejection>,
) -> ApiResult<Json<IdsResponse>> {
    let Json(request) = payload?;
    let updated = state.items.cancel_batch(request.wids).await?;
    Ok(Json(IdsResponse {
        success: true,
        updated,
    }))
}

/// POST /apiv1/upload_result/:wid/:key
///
/// Multipart body: a `file` part with the transcript and an optional `model`
/// part. The transcript is stored next to the cached audio file.
pub async fn upload_result(
    State(state): State<AppState>,
    path: Result<Path<(i64, String)>, PathRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<UploadResponse>> {
    let Path((wid, _key)) = path?;
    let mut multipart = multipart?;

    let mut transcript = None;
    let mut model = None;
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => transcript = Some(field.bytes().await?),
            "model" => model = Some(field.text().await?).filter(|m| !m.is_empty()),
            _ => {}
        }
    }
    let transcript =
        transcript.ok_or_else(|| ApiError::BadRequest("missing 'file' part".to_string()))?;

    let item = state
        .items
        .get(wid)
        .await?
        .ok_or_else(|| scribe_common::Error::NotFound(format!("work item {}", wid)))?;
    if item.transcript != TranscriptState::InProgress {
        return Err(scribe_common::Error::InvalidState {
            id: wid,
            found: item.transcript.label(),
        }
        .into());
    }
    let cache_file = item.cache_audio_file.ok_or_else(|| {
        ApiError::BadRequest(format!("work item {} has no cached audio file", wid))
    })?;

    let target = PathBuf::from(cache_file).with_extension(&state.settings.transcript_extension);
    let target_str = target.to_string_lossy().into_owned();

    // Stage per request so a losing concurrent upload never touches `target`
    let staged = PathBuf::from(format!("{}.{}.part", target_str, Uuid::new_v4().simple()));
    tokio::fs::write(&staged, &transcript).await?;

    if let Err(err) = state.items.complete(wid, &target_str, model.as_deref()).await {
        discard_staged(wid, &staged).await;
        return Err(err.into());
    }
    if let Err(err) = tokio::fs::rename(&staged, &target).await {
        error!(wid, error = %err, path = %target_str, "Completed item but failed to store transcript");
        discard_staged(wid, &staged).await;
        return Err(err.into());
    }

    info!(wid, bytes = transcript.len(), path = %target_str, "Stored uploaded transcript");
    Ok(Json(UploadResponse {
        success: true,
        transcript_file: target_str,
    }))
}

async fn discard_staged(wid: i64, staged: &std::path::Path) {
    if let Err(err) = tokio::fs::remove_file(staged).await {
        warn!(wid, error = %err, "Failed to remove staged transcript");
    }
}

/// POST /apiv1/upload_result_batch/:key
///
/// Transcripts were already written to shared storage by the worker; only the
/// paths are recorded.
pub async fn upload_result_batch(
    State(state): State<AppState>,
    payload: Result<Json<UploadBatchRequest>, JsonRejection>,
) -> ApiResult<Json<UploadBatchResponse>> {
    let Json(request) = payload?;
    let completed = request
        .items
        .into_iter()
        .map(|item| CompletedTranscript {
            id: item.wid,
            transcript_path: item.file_path,
            model: item.model,
        })
        .collect();

    let uploaded = state.items.complete_batch(completed).await?;
    Ok(Json(UploadBatchResponse {
        success: true,
        uploaded,
    }))
}

pub fn work_routes() -> Router<AppState> {
    Router::new()
        .route("/get_work/:language/:key", get(get_work))
        .route("/get_work_batch/:language/:key", get(get_work_batch))
        .route("/register_wip/:wid/:key", get(register_wip))
        .route("/register_wip_batch/:key", post(register_wip_batch))
        .route(
            "/upload_result/:wid/:key",
            post(upload_result).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/upload_result_batch/:key", post(upload_result_batch))
        .route("/cancel_work/:wid/:key", get(cancel_work))
        .route("/cancel_work_batch/:key", post(cancel_work_batch))
}
