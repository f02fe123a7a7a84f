// API error surface
// Every handler error renders as an RFC 7807 problem document with a trace
// id. Login failures share one variant so callers cannot distinguish which
// check failed.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::imaging::{ProcessingError, ValidationError};
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Request validation failed")]
    Validation(Vec<FieldError>),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is suspended")]
    AccountSuspended,

    #[error("Account has been deleted")]
    AccountDeleted,

    #[error("Account is not active")]
    AccountLocked,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token has been revoked")]
    TokenRevoked,

    #[error("Token has been revoked")]
    TokenBlacklisted,

    #[error("Refresh token replay detected")]
    TokenReplayDetected,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Session has expired")]
    SessionExpired,

    #[error("Authentication required")]
    Unauthorized,

    #[error("Insufficient permissions")]
    Forbidden,

    #[error("An account with this email already exists")]
    EmailAlreadyExists,

    #[error("This username is already taken")]
    UsernameAlreadyExists,

    #[error("Resource not found")]
    NotFound,

    #[error("Uploaded file is too large")]
    FileTooLarge,

    #[error("Unsupported media type")]
    InvalidMimeType,

    #[error("Image dimensions exceed the allowed maximum")]
    ImageTooLarge,

    #[error("Image pixel count exceeds the allowed maximum")]
    ImageTooManyPixels,

    #[error("Upload rejected by malware scan")]
    MalwareDetected,

    #[error("Image is too small")]
    ImageTooSmall,

    #[error("Unsupported image format")]
    UnsupportedFormat,

    #[error("Image processing failed")]
    ProcessingFailed,

    #[error("Rate limit exceeded")]
    RateLimited { retry_after: u64 },

    #[error("A dependency is unavailable")]
    DependencyUnavailable,

    #[error("Internal server error")]
    Internal(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// RFC 7807 problem document.
#[derive(Debug, Serialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidCredentials
            | ApiError::InvalidToken
            | ApiError::TokenExpired
            | ApiError::TokenRevoked
            | ApiError::TokenBlacklisted
            | ApiError::TokenReplayDetected
            | ApiError::SessionNotFound
            | ApiError::SessionExpired
            | ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::AccountSuspended
            | ApiError::AccountDeleted
            | ApiError::AccountLocked
            | ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::EmailAlreadyExists | ApiError::UsernameAlreadyExists => {
                StatusCode::CONFLICT
            },
            ApiError::FileTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::InvalidMimeType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::ImageTooLarge
            | ApiError::ImageTooManyPixels
            | ApiError::MalwareDetected
            | ApiError::ImageTooSmall
            | ApiError::UnsupportedFormat
            | ApiError::ProcessingFailed => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::DependencyUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable identifier used as the problem `type` suffix.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation",
            ApiError::InvalidCredentials => "invalid-credentials",
            ApiError::AccountSuspended => "account-suspended",
            ApiError::AccountDeleted => "account-deleted",
            ApiError::AccountLocked => "account-locked",
            ApiError::InvalidToken => "invalid-token",
            ApiError::TokenExpired => "token-expired",
            ApiError::TokenRevoked => "token-revoked",
            ApiError::TokenBlacklisted => "token-revoked",
            ApiError::TokenReplayDetected => "token-replay-detected",
            ApiError::SessionNotFound => "session-not-found",
            ApiError::SessionExpired => "session-expired",
            ApiError::Unauthorized => "unauthorized",
            ApiError::Forbidden => "forbidden",
            ApiError::EmailAlreadyExists => "email-already-exists",
            ApiError::UsernameAlreadyExists => "username-already-exists",
            ApiError::NotFound => "not-found",
            ApiError::FileTooLarge => "file-too-large",
            ApiError::InvalidMimeType => "invalid-mime-type",
            ApiError::ImageTooLarge => "image-too-large",
            ApiError::ImageTooManyPixels => "image-too-many-pixels",
            ApiError::MalwareDetected => "malware-detected",
            ApiError::ImageTooSmall => "image-too-small",
            ApiError::UnsupportedFormat => "unsupported-format",
            ApiError::ProcessingFailed => "processing-failed",
            ApiError::RateLimited { .. } => "rate-limited",
            ApiError::DependencyUnavailable => "dependency-unavailable",
            ApiError::Internal(_) => "internal",
        }
    }

    fn to_problem(&self) -> Problem {
        let status = self.status_code();
        let (errors, retry_after) = match self {
            ApiError::Validation(errors) => (Some(errors.clone()), None),
            ApiError::RateLimited { retry_after } => (None, Some(*retry_after)),
            _ => (None, None),
        };

        // Internal details stay in the logs.
        let detail = match self {
            ApiError::Internal(_) => "An unexpected error occurred".to_string(),
            other => other.to_string(),
        };

        Problem {
            problem_type: format!("https://lumina.dev/problems/{}", self.code()),
            title: status
                .canonical_reason()
                .unwrap_or("Error")
                .to_string(),
            status: status.as_u16(),
            detail,
            trace_id: Uuid::new_v4().to_string(),
            errors,
            retry_after,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(detail) = &self {
            tracing::error!(%detail, "internal error");
        }

        let problem = self.to_problem();
        let status = self.status_code();

        let mut response = (status, Json(problem)).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/problem+json"),
        );
        if let ApiError::RateLimited { retry_after } = self {
            if let Ok(value) = header::HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::FileTooLarge(_, _) => ApiError::FileTooLarge,
            ValidationError::InvalidMimeType => ApiError::InvalidMimeType,
            ValidationError::ImageTooLarge(_, _) => ApiError::ImageTooLarge,
            ValidationError::ImageTooManyPixels(_, _) => ApiError::ImageTooManyPixels,
            ValidationError::MalwareDetected(_) => ApiError::MalwareDetected,
            ValidationError::ScanFailed(detail) => ApiError::Internal(detail),
        }
    }
}

impl From<ProcessingError> for ApiError {
    fn from(err: ProcessingError) -> Self {
        match err {
            ProcessingError::UnsupportedFormat => ApiError::UnsupportedFormat,
            ProcessingError::InvalidDimensions => ApiError::ImageTooLarge,
            ProcessingError::ImageTooSmall(_) => ApiError::ImageTooSmall,
            ProcessingError::ProcessingFailed(_) | ProcessingError::InvalidVariantType(_) => {
                ApiError::ProcessingFailed
            },
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => ApiError::NotFound,
            StorageError::InvalidKey(_) | StorageError::PathTraversal => ApiError::NotFound,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<crate::utils::password::PasswordError> for ApiError {
    fn from(err: crate::utils::password::PasswordError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let fields = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| FieldError {
                    field: field.to_string(),
                    message: e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string()),
                })
            })
            .collect();
        ApiError::Validation(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::InvalidCredentials.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::FileTooLarge.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ApiError::InvalidMimeType.status_code(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            ApiError::ImageTooManyPixels.status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::EmailAlreadyExists.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::RateLimited { retry_after: 60 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_internal_detail_not_leaked() {
        let problem = ApiError::Internal("connection refused to db:5432".into()).to_problem();
        assert!(!problem.detail.contains("5432"));
    }

    #[test]
    fn test_problem_carries_trace_id() {
        let problem = ApiError::NotFound.to_problem();
        assert!(Uuid::parse_str(&problem.trace_id).is_ok());
        assert_eq!(problem.status, 404);
    }
}
