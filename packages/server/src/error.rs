use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use common::storage::StorageError;
use serde::Serialize;

use crate::domain::{DomainError, ShareError};

/// Structured error response returned by all endpoints on failure.
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    /// Machine-readable error code. One of: `VALIDATION_ERROR`, `TOKEN_MISSING`,
    /// `TOKEN_INVALID`, `PERMISSION_DENIED`, `USER_NOT_ACTIVE`, `NOT_ALLOWED`,
    /// `NOT_FOUND`, `METHOD_NOT_ALLOWED`, `CONFLICT`, `PRECONDITION_FAILED`,
    /// `RANGE_NOT_SATISFIABLE`, `STORAGE_FAULT`, `INTERNAL_ERROR`.
    #[schema(example = "VALIDATION_ERROR")]
    pub code: &'static str,
    /// Human-readable error description.
    #[schema(example = "Filename cannot be empty")]
    pub message: String,
}

/// Application-level error type.
#[derive(Debug)]
pub enum AppError {
    Validation(String),
    TokenMissing,
    TokenInvalid,
    PermissionDenied,
    UserNotActive,
    /// Operation valid in general but forbidden in the current domain state
    /// (frozen iteration, entity kind mismatch on a shared token, ...).
    NotAllowed(String),
    NotFound(String),
    /// A shared-access token was presented on an upload route.
    MethodNotAllowed,
    Conflict(String),
    /// A cache validator precondition (If-Match / If-Unmodified-Since) failed.
    PreconditionFailed,
    /// The requested byte range cannot be satisfied. Carries the resource's
    /// total length so the client can recompute a valid range.
    RangeNotSatisfiable {
        total: u64,
    },
    /// Blob I/O failed after the resource's metadata resolved. Distinct from
    /// `NotFound`: the resource exists but its bytes could not be delivered.
    Storage(String),
    Internal(String),
}

impl AppError {
    fn status_and_body(self) -> (StatusCode, ErrorBody) {
        match self {
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "VALIDATION_ERROR",
                    message: msg,
                },
            ),
            AppError::TokenMissing => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    code: "TOKEN_MISSING",
                    message: "Authentication required".into(),
                },
            ),
            AppError::TokenInvalid => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    code: "TOKEN_INVALID",
                    message: "Invalid or expired token".into(),
                },
            ),
            AppError::PermissionDenied => (
                StatusCode::FORBIDDEN,
                ErrorBody {
                    code: "PERMISSION_DENIED",
                    message: "Insufficient permissions".into(),
                },
            ),
            AppError::UserNotActive => (
                StatusCode::FORBIDDEN,
                ErrorBody {
                    code: "USER_NOT_ACTIVE",
                    message: "User account is not active".into(),
                },
            ),
            AppError::NotAllowed(msg) => (
                StatusCode::FORBIDDEN,
                ErrorBody {
                    code: "NOT_ALLOWED",
                    message: msg,
                },
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    code: "NOT_FOUND",
                    message: msg,
                },
            ),
            AppError::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                ErrorBody {
                    code: "METHOD_NOT_ALLOWED",
                    message: "Uploads are not available on shared-access routes".into(),
                },
            ),
            AppError::Conflict(msg) => (
                StatusCode::CONFLICT,
                ErrorBody {
                    code: "CONFLICT",
                    message: msg,
                },
            ),
            AppError::PreconditionFailed => (
                StatusCode::PRECONDITION_FAILED,
                ErrorBody {
                    code: "PRECONDITION_FAILED",
                    message: "Resource state does not match the given precondition".into(),
                },
            ),
            AppError::RangeNotSatisfiable { total } => (
                StatusCode::RANGE_NOT_SATISFIABLE,
                ErrorBody {
                    code: "RANGE_NOT_SATISFIABLE",
                    message: format!("Requested range not satisfiable (length {total})"),
                },
            ),
            AppError::Storage(detail) => {
                tracing::error!("Storage fault: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        code: "STORAGE_FAULT",
                        message: "File storage is unavailable".into(),
                    },
                )
            }
            AppError::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        code: "INTERNAL_ERROR",
                        message: "An unexpected error occurred".into(),
                    },
                )
            }
        }
    }

    /// Prefix the message of message-bearing variants. Used by the upload
    /// handler to surface how many files of a multipart request had already
    /// been stored when a later part failed.
    pub fn with_context(self, prefix: &str) -> AppError {
        match self {
            AppError::Validation(msg) => AppError::Validation(format!("{prefix}: {msg}")),
            AppError::NotAllowed(msg) => AppError::NotAllowed(format!("{prefix}: {msg}")),
            AppError::NotFound(msg) => AppError::NotFound(format!("{prefix}: {msg}")),
            AppError::Conflict(msg) => AppError::Conflict(format!("{prefix}: {msg}")),
            AppError::Storage(msg) => AppError::Storage(format!("{prefix}: {msg}")),
            AppError::Internal(msg) => AppError::Internal(format!("{prefix}: {msg}")),
            other => other,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let total = if let AppError::RangeNotSatisfiable { total } = &self {
            Some(*total)
        } else {
            None
        };

        let (status, body) = self.status_and_body();

        let mut response = (status, Json(body)).into_response();
        if let Some(total) = total
            && let Ok(value) = HeaderValue::from_str(&format!("bytes */{total}"))
        {
            response.headers_mut().insert(header::CONTENT_RANGE, value);
        }
        response
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(path) => AppError::NotFound(format!("File not found: {path}")),
            StorageError::InvalidPath(msg) => AppError::Validation(format!("Invalid path: {msg}")),
            StorageError::SizeLimitExceeded { actual, limit } => AppError::Validation(format!(
                "File exceeds maximum size ({actual} > {limit} bytes)"
            )),
            StorageError::Io(e) => AppError::Storage(e.to_string()),
        }
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::IterationNotFound(key) => {
                AppError::NotFound(format!("Iteration not found: {key}"))
            }
            DomainError::ResourceNotFound(path) => {
                AppError::NotFound(format!("File not found: {path}"))
            }
            DomainError::IterationFrozen(key) => {
                AppError::NotAllowed(format!("Iteration is frozen: {key}"))
            }
            DomainError::AlreadyExists(msg) => AppError::Conflict(msg),
            DomainError::Creation(msg) => AppError::Internal(format!("Creation failure: {msg}")),
        }
    }
}

impl From<ShareError> for AppError {
    fn from(err: ShareError) -> Self {
        match err {
            ShareError::NotFound => AppError::NotFound("Unknown or expired share token".into()),
        }
    }
}
