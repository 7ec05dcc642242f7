// API error type and its JSON body

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use grader_common::store::StoreError;
use grader_core::execution::ExecutionFault;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// One of `VALIDATION_ERROR`, `NOT_FOUND`, `LIMIT_REACHED`,
    /// `SERVICE_UNAVAILABLE`, `INTERNAL_ERROR`.
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    NotFound(String),
    LimitReached(String),
    ServiceUnavailable(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::LimitReached(_) => StatusCode::CONFLICT,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn into_body(self) -> ErrorBody {
        match self {
            ApiError::Validation(message) => ErrorBody {
                code: "VALIDATION_ERROR",
                message,
            },
            ApiError::NotFound(message) => ErrorBody {
                code: "NOT_FOUND",
                message,
            },
            ApiError::LimitReached(message) => ErrorBody {
                code: "LIMIT_REACHED",
                message,
            },
            ApiError::ServiceUnavailable(message) => ErrorBody {
                code: "SERVICE_UNAVAILABLE",
                message,
            },
            ApiError::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                ErrorBody {
                    code: "INTERNAL_ERROR",
                    message: "An internal error occurred".into(),
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(self.into_body())).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            StoreError::AttemptLimit { .. } => ApiError::LimitReached(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<ExecutionFault> for ApiError {
    fn from(fault: ExecutionFault) -> Self {
        match fault {
            ExecutionFault::UnsupportedLanguage(_) => ApiError::Validation(fault.to_string()),
            ExecutionFault::ServiceUnavailable(_) => ApiError::ServiceUnavailable(fault.to_string()),
            ExecutionFault::Timeout(_) | ExecutionFault::Transport(_) => {
                ApiError::Internal(fault.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::LimitReached("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::from(ExecutionFault::ServiceUnavailable("u".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_store_not_found_maps_to_404() {
        let err = ApiError::from(StoreError::NotFound {
            kind: "Test case",
            id: Uuid::nil(),
        });
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_attempt_limit_maps_to_409() {
        let err = ApiError::from(StoreError::AttemptLimit { used: 3, max: 3 });
        assert_eq!(err.status(), StatusCode::CONFLICT);
        let body = err.into_body();
        assert_eq!(body.code, "LIMIT_REACHED");
        assert!(body.message.contains("Maximum allowed: 3"));
    }

    #[test]
    fn test_internal_detail_hidden() {
        let body = ApiError::Internal("secret detail".into()).into_body();
        assert_eq!(body.code, "INTERNAL_ERROR");
        assert!(!body.message.contains("secret"));
    }
}
