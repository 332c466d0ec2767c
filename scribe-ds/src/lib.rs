//! scribe-ds library - transcription data server
//!
//! Hands out untranscribed episodes to workers, records claims, uploads and
//! cancellations, and serves curriculum-ordered training sessions.

use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use scribe_common::allocation::AllocationEngine;
use scribe_common::api::AccessKey;
use scribe_common::config::ServerConfig;
use scribe_common::db::{DbProxy, WorkItemStore};
use scribe_common::session::{build_session_store, SessionLimits, TrainingSessionManager};
use scribe_common::urls::PublicUrls;

pub mod api;
pub mod error;

pub use error::{ApiError, ApiResult};

/// Request handling knobs taken from configuration
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Extension of transcripts written by single uploads
    pub transcript_extension: String,
    /// Upper bound on `n` of a work batch request
    pub max_work_batch: usize,
}

/// Service context shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub items: WorkItemStore,
    pub allocator: AllocationEngine,
    pub sessions: TrainingSessionManager,
    pub access_key: Arc<AccessKey>,
    pub urls: PublicUrls,
    pub settings: Arc<ServiceSettings>,
}

impl AppState {
    /// Wire every component from configuration and an open pool
    pub async fn from_config(config: &ServerConfig, db: DbProxy) -> scribe_common::Result<Self> {
        let items = WorkItemStore::new(db.clone());
        let urls = PublicUrls::from_config(config);
        let store = build_session_store(config, &db).await?;
        let limits = SessionLimits {
            max_log_message_len: config.max_log_message_len,
            log_tail_len: config.log_tail_len,
        };

        Ok(Self {
            allocator: AllocationEngine::new(items.clone(), config.group_retry_attempts),
            sessions: TrainingSessionManager::new(store, items.clone(), urls.clone(), limits),
            access_key: Arc::new(AccessKey::new(&config.api_secret_key)?),
            items,
            urls,
            settings: Arc::new(ServiceSettings {
                transcript_extension: config.transcript_extension.clone(),
                max_work_batch: config.max_work_batch,
            }),
        })
    }
}

/// Build application router
///
/// Everything under `/apiv1` requires the access key as the last path segment;
/// `/health` is public.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;

    let protected = Router::new()
        .merge(api::catalog_routes())
        .merge(api::work_routes())
        .merge(api::training_routes())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::require_access_key,
        ));

    Router::new()
        .nest("/apiv1", protected)
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
