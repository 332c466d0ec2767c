//! Access-key middleware
//!
//! Every protected route ends in `/:key`. The key is checked here, before any
//! handler runs, so a rejected request never touches state.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::{ApiError, AppState};

pub async fn require_access_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let path = request.uri().path().trim_end_matches('/');
    let (route, provided) = path.rsplit_once('/').unwrap_or(("", path));

    if !state.access_key.verify(provided) {
        // Only the route prefix is logged; the last segment is the secret
        warn!(route, "Rejected request with invalid access key");
        return Err(ApiError::Unauthorized);
    }

    Ok(next.run(request).await)
}
