//! Application error types.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, warn};
use warden_core::auth::AuthError;

use crate::models::ErrorResponse;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Auth(e) => {
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    /// Client-facing body. 401s share one message, 5xx bodies are opaque.
    fn body(&self) -> ErrorResponse {
        let e = match self {
            AppError::NotFound(m) => {
                return ErrorResponse {
                    error: "not_found".into(),
                    message: m.clone(),
                    violations: None,
                    retry_after_secs: None,
                };
            }
            AppError::Auth(e) => e,
        };

        let kind = e.kind();
        let mut body = ErrorResponse {
            error: kind.code().into(),
            message: String::new(),
            violations: None,
            retry_after_secs: None,
        };
        body.message = match e {
            AuthError::Validation { violations } => {
                body.violations = Some(violations.clone());
                "Validation failed".into()
            }
            AuthError::AccountLocked { retry_after_secs } => {
                body.retry_after_secs = Some(*retry_after_secs);
                e.to_string()
            }
            AuthError::DuplicateCredential => e.to_string(),
            AuthError::InvalidCredentials => "Invalid credentials".into(),
            _ if kind.is_authentication_failure() => "Authentication required".into(),
            AuthError::InsufficientPrivileges { .. } => "Insufficient privileges".into(),
            AuthError::ResourceOwnership => "Access to this resource is not permitted".into(),
            AuthError::DirectoryUnavailable(_) => "Service temporarily unavailable".into(),
            _ => "Internal server error".into(),
        };
        body
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            match &self {
                AppError::Auth(e) if e.kind().is_retryable() => {
                    warn!(error = %e, "dependency unavailable")
                }
                e => error!(error = %e, "request failed"),
            }
        }

        let body = self.body();
        let retry_after = body.retry_after_secs;
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
