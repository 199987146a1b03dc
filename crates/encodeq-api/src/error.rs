//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use encodeq_store::StoreError;
use serde_json::json;
use tracing::error;

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    /// The store cannot take the request right now; clients may retry.
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => {
                error!(error = %msg, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<encodeq_core::Error> for ApiError {
    fn from(err: encodeq_core::Error) -> Self {
        match err {
            encodeq_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => ApiError::NotFound(err.to_string()),
            StoreError::Unavailable(_) | StoreError::Closed | StoreError::NotRecovered => {
                ApiError::Unavailable(err.to_string())
            }
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encodeq_core::JobId;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_store_errors_map_to_status() {
        assert_eq!(
            status_of(StoreError::NotFound(JobId::new(4)).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(StoreError::Unavailable("disk full".into()).into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(StoreError::Closed.into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(StoreError::UnknownJob(JobId::new(1)).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_validation_error_is_bad_request() {
        let err = encodeq_core::Error::InvalidInput("filename is required".into());
        assert_eq!(status_of(err.into()), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_other_core_errors_are_internal() {
        let err = encodeq_core::Error::Conflict("job 3 is completed".into());
        assert_eq!(status_of(err.into()), StatusCode::INTERNAL_SERVER_ERROR);
        let err = encodeq_core::Error::ExecutionFailed("failed to start /bin/bash".into());
        assert_eq!(status_of(err.into()), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
