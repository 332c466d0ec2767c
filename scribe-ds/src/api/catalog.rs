//! Read-only catalog queries

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    routing::get,
    Json, Router,
};
use scribe_common::api::{EpisodeListResponse, EpisodeQuery, EpisodeRecord, GroupListResponse};

use crate::{ApiError, ApiResult, AppState};

/// GET /apiv1/podcasts/:language/:key
///
/// Podcast titles in a language with their number of transcribed episodes.
pub async fn list_groups(
    State(state): State<AppState>,
    Path((language, _key)): Path<(String, String)>,
) -> ApiResult<Json<GroupListResponse>> {
    let podcasts = state.items.list_groups(&language).await?;
    Ok(Json(GroupListResponse {
        success: true,
        podcasts,
    }))
}

/// GET /apiv1/episodes/:key?title=
pub async fn list_episodes(
    State(state): State<AppState>,
    query: Result<Query<EpisodeQuery>, QueryRejection>,
) -> ApiResult<Json<EpisodeListResponse>> {
    let Query(query) = query?;
    if query.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title must not be empty".to_string()));
    }

    let episodes = state
        .items
        .list_transcribed_episodes(&query.title)
        .await?
        .into_iter()
        .filter_map(|item| EpisodeRecord::from_item(item, &state.urls))
        .collect();

    Ok(Json(EpisodeListResponse {
        success: true,
        title: query.title,
        episodes,
    }))
}

pub fn catalog_routes() -> Router<AppState> {
    Router::new()
        .route("/podcasts/:language/:key", get(list_groups))
        .route("/episodes/:key", get(list_episodes))
}
