//! HTTP error mapping for the data server
//!
//! Domain outcomes of the common crate become distinct status codes and
//! machine-readable error codes. Only infrastructure failures surface as
//! `INTERNAL_ERROR`.

use axum::{
    extract::multipart::{MultipartError, MultipartRejection},
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use scribe_common::api::ErrorResponse;
use scribe_common::db::BatchErrors;
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid access key")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Common(#[from] scribe_common::Error),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, Option<BatchErrors>) {
        use scribe_common::Error as E;

        match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", None),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", None),
            ApiError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", None),
            ApiError::Common(err) => match err {
                E::NoWorkAvailable(_) => (StatusCode::NOT_FOUND, "NO_WORK_AVAILABLE", None),
                E::EmptyDataset => (StatusCode::NOT_FOUND, "EMPTY_DATASET", None),
                E::UnknownSession(_) => (StatusCode::NOT_FOUND, "UNKNOWN_SESSION", None),
                E::UnknownBatch { .. } => (StatusCode::NOT_FOUND, "UNKNOWN_BATCH", None),
                E::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", None),
                E::Conflict { .. } => (StatusCode::CONFLICT, "CONFLICT", None),
                E::InvalidState { .. } => (StatusCode::CONFLICT, "INVALID_STATE", None),
                E::BatchRejected(buckets) => {
                    (StatusCode::CONFLICT, "BATCH_REJECTED", Some(buckets.clone()))
                }
                E::InvalidInput(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", None),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", None),
            },
        }
    }
}

macro_rules! bad_request_from_rejection {
    ($($rejection:ty),+) => {
        $(
            impl From<$rejection> for ApiError {
                fn from(rejection: $rejection) -> Self {
                    ApiError::BadRequest(rejection.body_text())
                }
            }
        )+
    };
}

bad_request_from_rejection!(JsonRejection, PathRejection, QueryRejection, MultipartRejection);

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::BadRequest(format!("malformed multipart body: {}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, buckets) = self.parts();
        let message = self.to_string();

        if status.is_server_error() {
            error!(code, "Request failed: {}", message);
        } else {
            debug!(code, status = status.as_u16(), "Request rejected: {}", message);
        }

        let mut body = ErrorResponse::new(code, message);
        if let Some(buckets) = buckets {
            body = body.with_buckets(buckets);
        }

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_common::db::Disqualification;
    use scribe_common::Error;

    #[test]
    fn test_domain_errors_are_distinguishable() {
        let cases = [
            (ApiError::Unauthorized, StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            (
                Error::NoWorkAvailable("none".into()).into(),
                StatusCode::NOT_FOUND,
                "NO_WORK_AVAILABLE",
            ),
            (Error::EmptyDataset.into(), StatusCode::NOT_FOUND, "EMPTY_DATASET"),
            (
                Error::UnknownBatch { epoch: 0, batch_id: 4 }.into(),
                StatusCode::NOT_FOUND,
                "UNKNOWN_BATCH",
            ),
            (
                Error::Conflict {
                    id: 1,
                    reason: Disqualification::AlreadyInProgress,
                }
                .into(),
                StatusCode::CONFLICT,
                "CONFLICT",
            ),
            (
                Error::InvalidState { id: 1, found: "unclaimed" }.into(),
                StatusCode::CONFLICT,
                "INVALID_STATE",
            ),
            (
                Error::Internal("boom".into()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
            ),
        ];

        for (err, status, code) in cases {
            let (s, c, _) = err.parts();
            assert_eq!((s, c), (status, code));
        }
    }

    #[test]
    fn test_batch_rejection_carries_buckets() {
        let mut buckets = BatchErrors::default();
        buckets.push(Disqualification::NotFound, 9);
        let err: ApiError = Error::BatchRejected(buckets.clone()).into();
        let (status, code, carried) = err.parts();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(code, "BATCH_REJECTED");
        assert_eq!(carried, Some(buckets));
    }
}
