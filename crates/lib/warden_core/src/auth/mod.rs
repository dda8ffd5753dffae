//! Authentication and authorization logic.
//!
//! Provides password policy evaluation, credential hashing, token issuance and
//! verification, per-request authorization, login throttling, and the
//! register/login/refresh flows that tie them to a [`UserDirectory`].
//!
//! [`UserDirectory`]: crate::directory::UserDirectory

pub mod authorize;
pub mod jwt;
pub mod password;
pub mod policy;
pub mod service;
pub mod throttle;

use thiserror::Error;

use crate::directory::DirectoryError;
use crate::models::auth::TokenType;

/// Authentication errors.
///
/// One tagged type for the whole core. Callers branch on [`AuthError::kind`]
/// and map it to a transport status through [`ErrorKind::status_code`].
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Validation error: {}", .violations.join(", "))]
    Validation { violations: Vec<String> },

    #[error("Email already registered")]
    DuplicateCredential,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Too many failed attempts, retry in {retry_after_secs}s")]
    AccountLocked { retry_after_secs: u64 },

    #[error("Hashing failed after {attempts} attempts")]
    Hashing { attempts: u32 },

    #[error("Malformed password hash")]
    MalformedHash,

    #[error("Token required")]
    TokenRequired,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token malformed")]
    TokenMalformed,

    #[error("Token signature invalid")]
    TokenSignatureInvalid,

    #[error("Token issuer or audience mismatch")]
    TokenIssuerMismatch,

    #[error("Token type mismatch: expected {expected}, got {actual}")]
    TokenTypeMismatch {
        expected: TokenType,
        actual: TokenType,
    },

    #[error("Refresh token already used")]
    RefreshTokenReused,

    #[error("Principal unavailable")]
    PrincipalUnavailable,

    #[error("Insufficient privileges: requires {required}")]
    InsufficientPrivileges { required: String },

    #[error("Resource is owned by another principal")]
    ResourceOwnership,

    #[error("Directory unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error discriminant with its status-code mapping.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    DuplicateCredential,
    InvalidCredentials,
    AccountLocked,
    Hashing,
    MalformedHash,
    TokenRequired,
    TokenExpired,
    TokenMalformed,
    TokenSignatureInvalid,
    TokenIssuerMismatch,
    TokenTypeMismatch,
    RefreshTokenReused,
    PrincipalUnavailable,
    InsufficientPrivileges,
    ResourceOwnership,
    DirectoryUnavailable,
    Config,
    Internal,
}

impl ErrorKind {
    /// HTTP status code for this kind.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::InvalidCredentials
            | ErrorKind::TokenRequired
            | ErrorKind::TokenExpired
            | ErrorKind::TokenMalformed
            | ErrorKind::TokenSignatureInvalid
            | ErrorKind::TokenIssuerMismatch
            | ErrorKind::TokenTypeMismatch
            | ErrorKind::RefreshTokenReused
            | ErrorKind::PrincipalUnavailable => 401,
            ErrorKind::InsufficientPrivileges | ErrorKind::ResourceOwnership => 403,
            ErrorKind::DuplicateCredential => 409,
            ErrorKind::AccountLocked => 429,
            ErrorKind::Hashing
            | ErrorKind::MalformedHash
            | ErrorKind::Config
            | ErrorKind::Internal => 500,
            ErrorKind::DirectoryUnavailable => 503,
        }
    }

    /// Stable machine-readable code.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::DuplicateCredential => "duplicate_credential",
            ErrorKind::InvalidCredentials => "invalid_credentials",
            ErrorKind::AccountLocked => "account_locked",
            ErrorKind::Hashing => "hashing_error",
            ErrorKind::MalformedHash => "malformed_hash",
            ErrorKind::TokenRequired => "token_required",
            ErrorKind::TokenExpired => "token_expired",
            ErrorKind::TokenMalformed => "token_malformed",
            ErrorKind::TokenSignatureInvalid => "token_signature_invalid",
            ErrorKind::TokenIssuerMismatch => "token_issuer_mismatch",
            ErrorKind::TokenTypeMismatch => "token_type_mismatch",
            ErrorKind::RefreshTokenReused => "refresh_token_reused",
            ErrorKind::PrincipalUnavailable => "principal_unavailable",
            ErrorKind::InsufficientPrivileges => "insufficient_privileges",
            ErrorKind::ResourceOwnership => "resource_ownership",
            ErrorKind::DirectoryUnavailable => "directory_unavailable",
            ErrorKind::Config => "config_error",
            ErrorKind::Internal => "internal_error",
        }
    }

    /// Whether a caller may retry the same request unchanged.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::DirectoryUnavailable)
    }

    /// Authentication failures (401) collapse to one client-facing message.
    pub fn is_authentication_failure(self) -> bool {
        self.status_code() == 401
    }
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::Validation { .. } => ErrorKind::Validation,
            AuthError::DuplicateCredential => ErrorKind::DuplicateCredential,
            AuthError::InvalidCredentials => ErrorKind::InvalidCredentials,
            AuthError::AccountLocked { .. } => ErrorKind::AccountLocked,
            AuthError::Hashing { .. } => ErrorKind::Hashing,
            AuthError::MalformedHash => ErrorKind::MalformedHash,
            AuthError::TokenRequired => ErrorKind::TokenRequired,
            AuthError::TokenExpired => ErrorKind::TokenExpired,
            AuthError::TokenMalformed => ErrorKind::TokenMalformed,
            AuthError::TokenSignatureInvalid => ErrorKind::TokenSignatureInvalid,
            AuthError::TokenIssuerMismatch => ErrorKind::TokenIssuerMismatch,
            AuthError::TokenTypeMismatch { .. } => ErrorKind::TokenTypeMismatch,
            AuthError::RefreshTokenReused => ErrorKind::RefreshTokenReused,
            AuthError::PrincipalUnavailable => ErrorKind::PrincipalUnavailable,
            AuthError::InsufficientPrivileges { .. } => ErrorKind::InsufficientPrivileges,
            AuthError::ResourceOwnership => ErrorKind::ResourceOwnership,
            AuthError::DirectoryUnavailable(_) => ErrorKind::DirectoryUnavailable,
            AuthError::Config(_) => ErrorKind::Config,
            AuthError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }

    pub(crate) fn validation(violations: Vec<String>) -> Self {
        AuthError::Validation { violations }
    }
}

impl From<DirectoryError> for AuthError {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::DuplicateEmail => AuthError::DuplicateCredential,
            DirectoryError::NotFound => AuthError::PrincipalUnavailable,
            DirectoryError::Timeout(_) | DirectoryError::Backend(_) => {
                AuthError::DirectoryUnavailable(e.to_string())
            }
        }
    }
}
