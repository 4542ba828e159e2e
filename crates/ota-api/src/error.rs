//! API error types and conversions

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use ota_core::OtaError;
use serde::Serialize;

/// API error type that converts to HTTP responses
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request
    BadRequest(String),
    /// 401 Unauthorized
    Unauthorized(String),
    /// 403 Forbidden
    Forbidden(String),
    /// 404 Not Found
    NotFound(String),
    /// 409 Conflict
    Conflict(String),
    /// 413 Payload Too Large
    PayloadTooLarge(String),
    /// 416 Range Not Satisfiable
    RangeNotSatisfiable { message: String, size: u64 },
    /// 422 Unprocessable Entity (integrity failure)
    UnprocessableEntity(String),
    /// 504 Gateway Timeout
    GatewayTimeout(String),
    /// 507 Insufficient Storage
    InsufficientStorage(String),
    /// 500 Internal Server Error
    Internal(String),
}

/// Standard error response format
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut content_range = None;
        let (status, error_type, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            ApiError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", msg)
            }
            ApiError::RangeNotSatisfiable { message, size } => {
                content_range = Some(format!("bytes */{}", size));
                (
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    "range_not_satisfiable",
                    message,
                )
            }
            ApiError::UnprocessableEntity(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "digest_mismatch", msg)
            }
            ApiError::GatewayTimeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "gateway_timeout", msg),
            ApiError::InsufficientStorage(msg) => {
                (StatusCode::INSUFFICIENT_STORAGE, "insufficient_storage", msg)
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        // Log errors at appropriate levels
        if status.is_server_error() {
            tracing::error!(error = error_type, %message, "API error");
        } else if status.is_client_error() {
            tracing::debug!(error = error_type, %message, "API client error");
        }

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        match content_range {
            Some(range) => (status, [(header::CONTENT_RANGE, range)], body).into_response(),
            None => (status, body).into_response(),
        }
    }
}

impl From<OtaError> for ApiError {
    fn from(err: OtaError) -> Self {
        let message = err.to_string();
        match err {
            OtaError::NotFound(_) => ApiError::NotFound(message),
            OtaError::EmptyVersionSet => ApiError::NotFound(message),
            OtaError::VersionAlreadyExists { .. } => ApiError::Conflict(message),
            OtaError::PayloadTooLarge { .. } => ApiError::PayloadTooLarge(message),
            OtaError::RangeNotSatisfiable { size, .. } => {
                ApiError::RangeNotSatisfiable { message, size }
            }
            OtaError::ReplaceNotAllowed => ApiError::Forbidden(message),
            OtaError::InvalidRequest(_) => ApiError::BadRequest(message),
            OtaError::DigestMismatch { .. } => ApiError::UnprocessableEntity(message),
            OtaError::DiskFull => ApiError::InsufficientStorage(message),
            OtaError::Timeout => ApiError::GatewayTimeout(message),
            OtaError::Io(e) => {
                tracing::error!(error = %e, "Storage I/O failure");
                ApiError::Internal("Storage failure".to_string())
            }
            OtaError::CorruptRegistry(detail) => {
                tracing::error!(%detail, "Registry corrupt");
                ApiError::Internal("Registry unavailable".to_string())
            }
        }
    }
}
