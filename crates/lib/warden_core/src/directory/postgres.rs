//! PostgreSQL directory.
//!
//! Email uniqueness is the `principals_email_lower_key` unique index; refresh
//! redemption is a single conditional `UPDATE ... RETURNING`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{DirectoryError, RefreshTokenStore, UserDirectory, normalize_email};
use crate::models::auth::{
    NewPrincipal, Principal, PrincipalId, PrincipalWithCredential, Redemption, RefreshTokenRecord,
    Role,
};

type PrincipalRow = (Uuid, String, String, String, bool, DateTime<Utc>);

const PRINCIPAL_COLUMNS: &str = "id, email, name, role, is_active, created_at";

fn principal_from_row(row: PrincipalRow) -> Result<Principal, DirectoryError> {
    let (id, email, name, role, is_active, created_at) = row;
    let role: Role = role.parse().map_err(DirectoryError::Backend)?;
    Ok(Principal {
        id: PrincipalId::from_uuid(id),
        email,
        name,
        role,
        is_active,
        created_at,
    })
}

#[derive(Debug, Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl UserDirectory for PgDirectory {
    async fn create(&self, new: NewPrincipal) -> Result<Principal, DirectoryError> {
        let row = sqlx::query_as::<_, PrincipalRow>(&format!(
            "INSERT INTO principals (id, email, name, role, password_hash) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {PRINCIPAL_COLUMNS}"
        ))
        .bind(Uuid::now_v7())
        .bind(normalize_email(&new.email))
        .bind(&new.name)
        .bind(new.role.as_str())
        .bind(&new.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => DirectoryError::DuplicateEmail,
            other => DirectoryError::from(other),
        })?;
        principal_from_row(row)
    }

    async fn find_by_email(
        &self,
        email: &str,
    ) -> Result<Option<PrincipalWithCredential>, DirectoryError> {
        let row = sqlx::query_as::<_, (Uuid, String, String, String, bool, DateTime<Utc>, String)>(
            &format!(
                "SELECT {PRINCIPAL_COLUMNS}, password_hash FROM principals \
                 WHERE lower(email) = $1"
            ),
        )
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(id, email, name, role, is_active, created_at, password_hash)| {
            Ok(PrincipalWithCredential {
                principal: principal_from_row((id, email, name, role, is_active, created_at))?,
                password_hash,
            })
        })
        .transpose()
    }

    async fn find_by_id(&self, id: PrincipalId) -> Result<Option<Principal>, DirectoryError> {
        let row = sqlx::query_as::<_, PrincipalRow>(&format!(
            "SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(principal_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<Principal>, DirectoryError> {
        let rows = sqlx::query_as::<_, PrincipalRow>(&format!(
            "SELECT {PRINCIPAL_COLUMNS} FROM principals ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(principal_from_row).collect()
    }

    async fn set_active(
        &self,
        id: PrincipalId,
        active: bool,
    ) -> Result<Principal, DirectoryError> {
        let row = sqlx::query_as::<_, PrincipalRow>(&format!(
            "UPDATE principals SET is_active = $2 WHERE id = $1 RETURNING {PRINCIPAL_COLUMNS}"
        ))
        .bind(id.as_uuid())
        .bind(active)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DirectoryError::NotFound)?;
        principal_from_row(row)
    }

    async fn delete(&self, id: PrincipalId) -> Result<bool, DirectoryError> {
        let result = sqlx::query("DELETE FROM principals WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl RefreshTokenStore for PgDirectory {
    async fn store(&self, record: RefreshTokenRecord) -> Result<(), DirectoryError> {
        sqlx::query(
            "INSERT INTO refresh_tokens (id, subject_id, token_hash, expires_at, used) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(record.id)
        .bind(record.subject_id.as_uuid())
        .bind(&record.token_hash)
        .bind(record.expires_at)
        .bind(record.used)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn redeem(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Redemption, DirectoryError> {
        let redeemed = sqlx::query_scalar::<_, Uuid>(
            "UPDATE refresh_tokens SET used = true, used_at = $2 \
             WHERE token_hash = $1 AND used = false AND expires_at > $2 \
             RETURNING subject_id",
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(subject) = redeemed {
            return Ok(Redemption::Redeemed(PrincipalId::from_uuid(subject)));
        }

        let existing = sqlx::query_as::<_, (Uuid, bool)>(
            "SELECT subject_id, used FROM refresh_tokens \
             WHERE token_hash = $1 AND expires_at > $2",
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(match existing {
            Some((subject, true)) => Redemption::AlreadyUsed(PrincipalId::from_uuid(subject)),
            _ => Redemption::Unknown,
        })
    }

    async fn revoke_all(&self, subject: PrincipalId) -> Result<u64, DirectoryError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET used = true, used_at = now() \
             WHERE subject_id = $1 AND used = false",
        )
        .bind(subject.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, DirectoryError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
