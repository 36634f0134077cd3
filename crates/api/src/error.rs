//! Centralized error handling with proper HTTP status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use quorum_types::Error as CoordinatorError;
use serde_json::json;

/// API Result type
pub type ApiResult<T> = Result<T, ApiError>;

/// API error types with appropriate HTTP status codes
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl ApiError {
    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Get error type as string
    pub fn error_type(&self) -> &str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::Conflict(_) => "conflict",
            ApiError::Unprocessable(_) => "unprocessable",
            ApiError::InternalError(_) => "internal_error",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_type = self.error_type();
        let message = self.to_string();

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

// Convert coordinator errors to API errors
impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::VaultNotFound(_)
            | CoordinatorError::GuardianNotFound(_)
            | CoordinatorError::TransactionNotFound(_) => ApiError::NotFound(err.to_string()),
            CoordinatorError::NotParticipating { .. } => ApiError::Forbidden(err.to_string()),
            CoordinatorError::InvalidPayload(_) => ApiError::BadRequest(err.to_string()),
            CoordinatorError::DuplicateTransaction(_)
            | CoordinatorError::DuplicateConflict { .. }
            | CoordinatorError::WrongPhase { .. }
            | CoordinatorError::TransactionNotActive(_)
            | CoordinatorError::ConflictingStatus { .. }
            | CoordinatorError::RepositoryConflict(_) => ApiError::Conflict(err.to_string()),
            CoordinatorError::AggregationFailure(_) => ApiError::Unprocessable(err.to_string()),
            CoordinatorError::Timeout => ApiError::ServiceUnavailable(err.to_string()),
            CoordinatorError::Storage(_) | CoordinatorError::Transport(_) => {
                ApiError::InternalError(err.to_string())
            }
        }
    }
}

// Convert anyhow errors to API errors
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::InternalError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_types::TransactionId;

    #[test]
    fn test_status_codes_follow_error_kind() {
        let not_found: ApiError =
            CoordinatorError::TransactionNotFound(TransactionId::from("tx-1")).into();
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);

        let inactive: ApiError =
            CoordinatorError::TransactionNotActive(TransactionId::from("tx-1")).into();
        assert_eq!(inactive.status_code(), StatusCode::CONFLICT);

        let bad: ApiError = CoordinatorError::InvalidPayload("nope".to_string()).into();
        assert_eq!(bad.status_code(), StatusCode::BAD_REQUEST);
    }
}
