//! In-memory directory backed by `DashMap`.
//!
//! Email uniqueness is enforced through the entry API on the email index, so
//! check-then-insert is one atomic step per email. Lock order is always
//! email index before principals.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{DirectoryError, RefreshTokenStore, UserDirectory, normalize_email};
use crate::models::auth::{
    NewPrincipal, Principal, PrincipalId, PrincipalWithCredential, Redemption, RefreshTokenRecord,
};

/// Stored refresh records above which `redeem` sweeps expired ones first.
const PURGE_THRESHOLD: usize = 1024;

#[derive(Debug, Default)]
pub struct MemoryDirectory {
    emails: DashMap<String, PrincipalId>,
    principals: DashMap<PrincipalId, PrincipalWithCredential>,
    refresh_tokens: DashMap<String, RefreshTokenRecord>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the refresh record stored under `token_hash`.
    pub fn refresh_record(&self, token_hash: &str) -> Option<RefreshTokenRecord> {
        self.refresh_tokens.get(token_hash).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.principals.len()
    }

    /// Number of stored refresh records, used or not.
    pub fn refresh_records(&self) -> usize {
        self.refresh_tokens.len()
    }

    fn sweep(&self, now: DateTime<Utc>) -> u64 {
        let mut removed = 0;
        self.refresh_tokens.retain(|_, record| {
            let keep = record.expires_at > now;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub fn is_empty(&self) -> bool {
        self.principals.is_empty()
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn create(&self, new: NewPrincipal) -> Result<Principal, DirectoryError> {
        let email = normalize_email(&new.email);
        match self.emails.entry(email.clone()) {
            Entry::Occupied(_) => Err(DirectoryError::DuplicateEmail),
            Entry::Vacant(slot) => {
                let principal = Principal {
                    id: PrincipalId::new(),
                    email,
                    name: new.name,
                    role: new.role,
                    is_active: true,
                    created_at: Utc::now(),
                };
                self.principals.insert(
                    principal.id,
                    PrincipalWithCredential {
                        principal: principal.clone(),
                        password_hash: new.password_hash,
                    },
                );
                slot.insert(principal.id);
                Ok(principal)
            }
        }
    }

    async fn find_by_email(
        &self,
        email: &str,
    ) -> Result<Option<PrincipalWithCredential>, DirectoryError> {
        let id = match self.emails.get(&normalize_email(email)) {
            Some(entry) => *entry.value(),
            None => return Ok(None),
        };
        Ok(self.principals.get(&id).map(|r| r.value().clone()))
    }

    async fn find_by_id(&self, id: PrincipalId) -> Result<Option<Principal>, DirectoryError> {
        Ok(self.principals.get(&id).map(|r| r.value().principal.clone()))
    }

    async fn list(&self) -> Result<Vec<Principal>, DirectoryError> {
        let mut all: Vec<Principal> = self
            .principals
            .iter()
            .map(|r| r.value().principal.clone())
            .collect();
        all.sort_by_key(|p| p.id);
        Ok(all)
    }

    async fn set_active(
        &self,
        id: PrincipalId,
        active: bool,
    ) -> Result<Principal, DirectoryError> {
        let mut entry = self.principals.get_mut(&id).ok_or(DirectoryError::NotFound)?;
        entry.principal.is_active = active;
        Ok(entry.principal.clone())
    }

    async fn delete(&self, id: PrincipalId) -> Result<bool, DirectoryError> {
        let email = match self.principals.get(&id) {
            Some(entry) => entry.principal.email.clone(),
            None => return Ok(false),
        };
        self.emails.remove(&email);
        Ok(self.principals.remove(&id).is_some())
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryDirectory {
    async fn store(&self, record: RefreshTokenRecord) -> Result<(), DirectoryError> {
        self.refresh_tokens.insert(record.token_hash.clone(), record);
        Ok(())
    }

    async fn redeem(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Redemption, DirectoryError> {
        if self.refresh_tokens.len() > PURGE_THRESHOLD {
            self.sweep(now);
        }

        // The shard write lock held by `get_mut` makes check-and-mark atomic.
        let Some(mut record) = self.refresh_tokens.get_mut(token_hash) else {
            return Ok(Redemption::Unknown);
        };
        if record.expires_at <= now {
            return Ok(Redemption::Unknown);
        }
        if record.used {
            return Ok(Redemption::AlreadyUsed(record.subject_id));
        }
        record.used = true;
        Ok(Redemption::Redeemed(record.subject_id))
    }

    async fn revoke_all(&self, subject: PrincipalId) -> Result<u64, DirectoryError> {
        let mut revoked = 0;
        for mut entry in self.refresh_tokens.iter_mut() {
            if entry.subject_id == subject && !entry.used {
                entry.used = true;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, DirectoryError> {
        Ok(self.sweep(now))
    }
}
