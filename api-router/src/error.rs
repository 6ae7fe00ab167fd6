use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// HTTP-facing error. Every service failure maps to exactly one of these,
/// and this module owns the only status/code mapping.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    #[error("Internal server error")]
    Internal(String),

    #[error("Upstream service error: {0}")]
    ExternalService(String),

    #[error("Request timed out")]
    Timeout,
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Validation(msg) | AppError::LLMParsing(msg) => Self::Validation(msg),
            AppError::Auth(msg) => Self::Unauthorized(msg),
            AppError::Forbidden(msg) => Self::Forbidden(msg),
            AppError::NotFound(msg) => Self::NotFound(msg),
            AppError::Conflict(msg) => Self::Conflict(msg),
            AppError::RateLimited { retry_after_secs } => Self::RateLimited { retry_after_secs },
            AppError::ExternalService { .. } | AppError::ObjectStore(_) => {
                tracing::error!("Upstream failure: {err:?}");
                Self::ExternalService("Upstream service failed".to_string())
            }
            AppError::Timeout(_) => Self::Timeout,
            _ => {
                tracing::error!("Internal error: {err:?}");
                Self::Internal("Internal server error".to_string())
            }
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ErrorDetail {
    code: String,
    message: String,
    details: Option<Value>,
}

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    error: ErrorDetail,
}

/// The uniform error envelope: `{"error": {"code", "message", "details"}}`.
pub fn error_body(code: &str, message: &str, details: Option<Value>) -> Json<ErrorBody> {
    Json(ErrorBody {
        error: ErrorDetail {
            code: code.to_string(),
            message: message.to_string(),
            details,
        },
    })
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                msg.clone(),
                None,
            ),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone(), None),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone(), None),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone(), None),
            Self::RateLimited { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMIT_EXCEEDED",
                "Too many requests. Please try again later.".to_string(),
                Some(serde_json::json!({ "retry_after": retry_after_secs })),
            ),
            Self::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
                "Internal server error".to_string(),
                None,
            ),
            Self::ExternalService(msg) => (
                StatusCode::BAD_GATEWAY,
                "EXTERNAL_SERVICE_ERROR",
                msg.clone(),
                None,
            ),
            Self::Timeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "REQUEST_TIMEOUT",
                "Request processing timed out.".to_string(),
                None,
            ),
        };

        (status, error_body(code, &message, details)).into_response()
    }
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
    fn test_app_error_to_api_error_conversion() {
        let not_found = AppError::NotFound("resource not found".to_string());
        let api_error = ApiError::from(not_found);
        assert!(matches!(api_error, ApiError::NotFound(msg) if msg == "resource not found"));

        let validation = AppError::Validation("invalid input".to_string());
        let api_error = ApiError::from(validation);
        assert!(matches!(api_error, ApiError::Validation(msg) if msg == "invalid input"));

        let auth = AppError::Auth("unauthorized".to_string());
        let api_error = ApiError::from(auth);
        assert!(matches!(api_error, ApiError::Unauthorized(msg) if msg == "unauthorized"));

        let upstream = AppError::external("LLM", "gateway exploded");
        let api_error = ApiError::from(upstream);
        assert!(matches!(api_error, ApiError::ExternalService(_)));

        let internal = AppError::Io(std::io::Error::other("io error"));
        let api_error = ApiError::from(internal);
        assert!(matches!(api_error, ApiError::Internal(_)));
    }

    #[test]
    fn test_api_error_response_status_codes() {
        assert_status_code(
            ApiError::Validation("bad".into()),
            StatusCode::BAD_REQUEST,
        );
        assert_status_code(
            ApiError::Unauthorized("no".into()),
            StatusCode::UNAUTHORIZED,
        );
        assert_status_code(ApiError::Forbidden("no".into()), StatusCode::FORBIDDEN);
        assert_status_code(ApiError::NotFound("gone".into()), StatusCode::NOT_FOUND);
        assert_status_code(ApiError::Conflict("dup".into()), StatusCode::CONFLICT);
        assert_status_code(
            ApiError::RateLimited {
                retry_after_secs: 10,
            },
            StatusCode::TOO_MANY_REQUESTS,
        );
        assert_status_code(
            ApiError::Internal("secret".into()),
            StatusCode::INTERNAL_SERVER_ERROR,
        );
        assert_status_code(
            ApiError::ExternalService("llm down".into()),
            StatusCode::BAD_GATEWAY,
        );
        assert_status_code(ApiError::Timeout, StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_internal_error_sanitization() {
        // The wire message never leaks the internal detail.
        let api_error = ApiError::Internal("db password incorrect".to_string());
        assert_eq!(api_error.to_string(), "Internal server error");
        assert_status_code(api_error, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_envelope_shape() {
        let body = error_body("NOT_FOUND", "missing", None);
        let encoded = serde_json::to_value(&body.0).expect("encode");
        assert_eq!(encoded["error"]["code"], "NOT_FOUND");
        assert_eq!(encoded["error"]["message"], "missing");
        assert!(encoded["error"]["details"].is_null());
    }
}
