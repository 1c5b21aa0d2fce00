use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Serialize, Clone)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::NotFound(msg) => Self::NotFound(msg),
            AppError::Validation(msg) => Self::ValidationError(msg),
            AppError::IndexCorrupt(_) => {
                tracing::warn!("serving 503 for corrupt index: {:?}", err);
                Self::Unavailable("index rebuilding, retry shortly".to_owned())
            }
            other => {
                tracing::error!("Internal error: {:?}", other);
                Self::InternalError("Internal server error".to_owned())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            Self::InternalError(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    error: message,
                    status: "error".to_string(),
                },
            ),
            Self::ValidationError(message) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorResponse {
                    error: message,
                    status: "error".to_string(),
                },
            ),
            Self::NotFound(message) => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: message,
                    status: "error".to_string(),
                },
            ),
            Self::Unavailable(message) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse {
                    error: message,
                    status: "error".to_string(),
                },
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Debug;

    fn assert_status_code<T: IntoResponse + Debug>(response: T, expected_status: StatusCode) {
        let response = response.into_response();
        assert_eq!(response.status(), expected_status);
    }

    #[test]
    fn app_error_conversion_keeps_the_category() {
        let not_found = AppError::NotFound("no index for partition".to_string());
        assert!(matches!(ApiError::from(not_found), ApiError::NotFound(_)));

        let validation = AppError::Validation("tenant_id must not be empty".to_string());
        assert!(matches!(
            ApiError::from(validation),
            ApiError::ValidationError(msg) if msg.contains("tenant_id")
        ));

        let corrupt = AppError::IndexCorrupt("sha mismatch".to_string());
        assert!(matches!(ApiError::from(corrupt), ApiError::Unavailable(_)));

        let internal = AppError::Io(std::io::Error::other("disk gone"));
        assert!(matches!(ApiError::from(internal), ApiError::InternalError(_)));
    }

    #[test]
    fn status_codes_match_the_contract() {
        assert_status_code(
            ApiError::ValidationError("field".into()),
            StatusCode::UNPROCESSABLE_ENTITY,
        );
        assert_status_code(ApiError::NotFound("gone".into()), StatusCode::NOT_FOUND);
        assert_status_code(
            ApiError::Unavailable("rebuilding".into()),
            StatusCode::SERVICE_UNAVAILABLE,
        );
        assert_status_code(
            ApiError::InternalError("oops".into()),
            StatusCode::INTERNAL_SERVER_ERROR,
        );
    }

    #[test]
    fn internal_errors_never_leak_details() {
        let err = AppError::InternalError("db password incorrect".to_string());
        let api_error = ApiError::from(err);
        assert_eq!(api_error.to_string(), "Internal server error");
    }
}
