//! Training session endpoints

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::{get, post},
    Json, Router,
};

use scribe_common::api::{
    LogRequest, MarkDoneRequest, NextBatchResponse, SessionStartedResponse,
    SessionStatusResponse, StartSessionRequest, SuccessResponse,
};

use crate::{ApiResult, AppState};

/// POST /apiv1/training/start/:key
pub async fn start_session(
    State(state): State<AppState>,
    payload: Result<Json<StartSessionRequest>, JsonRejection>,
) -> ApiResult<Json<SessionStartedResponse>> {
    let Json(request) = payload?;
    let created = state.sessions.create(request.into()).await?;
    Ok(Json(SessionStartedResponse {
        success: true,
        session_id: created.session_id,
        num_samples: created.num_samples,
        batch_size: created.batch_size,
        order: created.order,
    }))
}

/// GET /apiv1/training/:sid/next_batch/:key
pub async fn next_batch(
    State(state): State<AppState>,
    Path((session_id, _key)): Path<(String, String)>,
) -> ApiResult<Json<NextBatchResponse>> {
    let batch = state.sessions.next_batch(&session_id).await?;
    Ok(Json(NextBatchResponse {
        success: true,
        batch_id: batch.batch_id,
        epoch: batch.epoch,
        items: batch.items,
    }))
}

/// POST /apiv1/training/:sid/mark_done/:key
pub async fn mark_done(
    State(state): State<AppState>,
    Path((session_id, _key)): Path<(String, String)>,
    payload: Result<Json<MarkDoneRequest>, JsonRejection>,
) -> ApiResult<Json<SuccessResponse>> {
    let Json(request) = payload?;
    state
        .sessions
        .mark_batch_done(&session_id, request.epoch, request.batch_id)
        .await?;
    Ok(Json(SuccessResponse::ok()))
}

/// POST /apiv1/training/:sid/log/:key
pub async fn append_log(
    State(state): State<AppState>,
    Path((session_id, _key)): Path<(String, String)>,
    payload: Result<Json<LogRequest>, JsonRejection>,
) -> ApiResult<Json<SuccessResponse>> {
    let Json(request) = payload?;
    state
        .sessions
        .append_log(&session_id, &request.level, &request.message)
        .await?;
    Ok(Json(SuccessResponse::ok()))
}

/// GET /apiv1/training/:sid/status/:key
pub async fn status(
    State(state): State<AppState>,
    Path((session_id, _key)): Path<(String, String)>,
) -> ApiResult<Json<SessionStatusResponse>> {
    let status = state.sessions.status(&session_id).await?;
    Ok(Json(SessionStatusResponse {
        success: true,
        status,
    }))
}

/// POST /apiv1/training/:sid/end/:key
///
/// Ending an unknown session is not an error; it reports `success: false`.
pub async fn end_session(
    State(state): State<AppState>,
    Path((session_id, _key)): Path<(String, String)>,
) -> ApiResult<Json<SuccessResponse>> {
    let removed = state.sessions.end(&session_id).await?;
    Ok(Json(SuccessResponse::with(removed)))
}

pub fn training_routes() -> Router<AppState> {
    Router::new()
        .route("/training/start/:key", post(start_session))
        .route("/training/:sid/next_batch/:key", get(next_batch))
        .route("/training/:sid/mark_done/:key", post(mark_done))
        .route("/training/:sid/log/:key", post(append_log))
        .route("/training/:sid/status/:key", get(status))
        .route("/training/:sid/end/:key", post(end_session))
}
