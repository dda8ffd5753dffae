//! User directory and refresh-token store collaborators.
//!
//! The core never owns persistence; it is handed implementations of these
//! traits at construction time. [`memory::MemoryDirectory`] backs tests and
//! single-process deployments, [`postgres::PgDirectory`] backs the server when
//! a database is configured.

pub mod memory;
pub mod postgres;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::auth::{
    NewPrincipal, Principal, PrincipalId, PrincipalWithCredential, Redemption, RefreshTokenRecord,
};

/// Directory errors.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("email already registered")]
    DuplicateEmail,

    #[error("principal not found")]
    NotFound,

    #[error("directory call timed out after {0:?}")]
    Timeout(Duration),

    #[error("directory backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for DirectoryError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => DirectoryError::NotFound,
            other => DirectoryError::Backend(other.to_string()),
        }
    }
}

/// Principals and their credentials, created and deleted together.
///
/// Implementations must make `create` atomic on email: of two concurrent
/// creates for the same (case-insensitive) email exactly one succeeds and the
/// other returns [`DirectoryError::DuplicateEmail`].
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn create(&self, new: NewPrincipal) -> Result<Principal, DirectoryError>;

    async fn find_by_email(
        &self,
        email: &str,
    ) -> Result<Option<PrincipalWithCredential>, DirectoryError>;

    async fn find_by_id(&self, id: PrincipalId) -> Result<Option<Principal>, DirectoryError>;

    async fn list(&self) -> Result<Vec<Principal>, DirectoryError>;

    /// Administrative activation toggle.
    async fn set_active(&self, id: PrincipalId, active: bool)
    -> Result<Principal, DirectoryError>;

    /// Delete a principal and its credential. Returns whether it existed.
    async fn delete(&self, id: PrincipalId) -> Result<bool, DirectoryError>;
}

/// Single-use refresh-token records.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn store(&self, record: RefreshTokenRecord) -> Result<(), DirectoryError>;

    /// Atomically check-and-mark-used the unexpired record with `token_hash`.
    ///
    /// Of two concurrent redemptions of the same record exactly one gets
    /// [`Redemption::Redeemed`].
    async fn redeem(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Redemption, DirectoryError>;

    /// Mark every record of `subject` used. Returns how many changed.
    async fn revoke_all(&self, subject: PrincipalId) -> Result<u64, DirectoryError>;

    /// Delete records that expired at or before `now`. Returns how many went.
    ///
    /// Used but unexpired records stay, so reuse is still detected.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, DirectoryError>;
}

/// Run a directory call under a deadline; elapsed becomes [`DirectoryError::Timeout`].
pub async fn within<T, F>(timeout: Duration, call: F) -> Result<T, DirectoryError>
where
    F: Future<Output = Result<T, DirectoryError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(DirectoryError::Timeout(timeout)),
    }
}

/// Trim and lowercase an email for lookup and uniqueness.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
