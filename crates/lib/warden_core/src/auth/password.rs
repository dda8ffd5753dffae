// @zen-component: AUTH-CredentialHasher
//
//! Password hashing via bcrypt.
//!
//! Hashing is CPU-bound, so every primitive call runs on the blocking pool.
//! `hash` retries transient failures with exponential backoff; `verify` never
//! retries.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{error, warn};

use super::AuthError;
use super::policy::normalize;
use crate::clock::{Sleeper, TokioSleeper};

/// Default bcrypt cost factor.
pub const DEFAULT_COST: u32 = 12;

/// Retries after the first failed hashing attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Upper bound on retries; the last backoff is `BASE_BACKOFF * 2^9`.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Backoff before retry `n` is `BASE_BACKOFF * 2^n`.
pub const BASE_BACKOFF: Duration = Duration::from_millis(100);

const DUMMY_PASSWORD: &str = "warden-timing-equalizer";

/// Failure reported by a hashing primitive.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct PrimitiveError(pub String);

impl From<bcrypt::BcryptError> for PrimitiveError {
    fn from(e: bcrypt::BcryptError) -> Self {
        PrimitiveError(e.to_string())
    }
}

/// One-way, salted, adaptive-cost hashing primitive.
pub trait HashPrimitive: Send + Sync + 'static {
    fn hash(&self, password: &str, cost: u32) -> Result<String, PrimitiveError>;
    fn verify(&self, password: &str, hash: &str) -> Result<bool, PrimitiveError>;
}

/// bcrypt with a fresh random salt per call; comparison is constant-time.
#[derive(Debug, Default, Clone, Copy)]
pub struct Bcrypt;

impl HashPrimitive for Bcrypt {
    fn hash(&self, password: &str, cost: u32) -> Result<String, PrimitiveError> {
        Ok(bcrypt::hash(password, cost)?)
    }

    fn verify(&self, password: &str, hash: &str) -> Result<bool, PrimitiveError> {
        Ok(bcrypt::verify(password, hash)?)
    }
}

/// Whether `hash` has the shape `$2{a,b,y}$NN$<53 chars of bcrypt base64>`.
pub fn is_bcrypt_hash(hash: &str) -> bool {
    let bytes = hash.as_bytes();
    if bytes.len() != 60 {
        return false;
    }
    let prefix_ok = matches!(&bytes[..4], b"$2a$" | b"$2b$" | b"$2y$");
    let cost_ok = bytes[4].is_ascii_digit() && bytes[5].is_ascii_digit() && bytes[6] == b'$';
    let body_ok = bytes[7..]
        .iter()
        .all(|b| b.is_ascii_alphanumeric() || *b == b'.' || *b == b'/');
    prefix_ok && cost_ok && body_ok
}

/// Hashes and verifies credentials.
pub struct CredentialHasher {
    primitive: Arc<dyn HashPrimitive>,
    sleeper: Arc<dyn Sleeper>,
    cost: u32,
    max_retries: u32,
    base_backoff: Duration,
    dummy_hash: OnceCell<String>,
}

impl CredentialHasher {
    /// bcrypt at `cost`, tokio sleeps, default retry bound.
    pub fn new(cost: u32) -> Self {
        Self {
            primitive: Arc::new(Bcrypt),
            sleeper: Arc::new(TokioSleeper),
            cost,
            max_retries: DEFAULT_MAX_RETRIES,
            base_backoff: BASE_BACKOFF,
            dummy_hash: OnceCell::new(),
        }
    }

    pub fn with_primitive(mut self, primitive: Arc<dyn HashPrimitive>) -> Self {
        self.primitive = primitive;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Clamped to [`MAX_RETRIES_LIMIT`].
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.min(MAX_RETRIES_LIMIT);
        self
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash the normalized password with a fresh salt.
    ///
    /// Fails with `Hashing` only after `1 + max_retries` attempts.
    pub async fn hash(&self, password: &str) -> Result<String, AuthError> {
        let password = normalize(password);
        if password.is_empty() {
            return Err(AuthError::validation(vec!["password required".into()]));
        }

        let attempts = self.max_retries.saturating_add(1);
        let mut last_error = String::new();
        for attempt in 0..attempts {
            if attempt > 0 {
                let backoff = self.base_backoff * 2u32.saturating_pow(attempt - 1);
                warn!(attempt, backoff_ms = backoff.as_millis() as u64, "retrying password hash");
                self.sleeper.sleep(backoff).await;
            }

            let primitive = Arc::clone(&self.primitive);
            let candidate = password.clone();
            let cost = self.cost;
            match tokio::task::spawn_blocking(move || primitive.hash(&candidate, cost)).await {
                Ok(Ok(hash)) => return Ok(hash),
                Ok(Err(e)) => last_error = e.to_string(),
                Err(e) => last_error = format!("hashing task failed: {e}"),
            }
        }

        error!(attempts, detail = %last_error, "password hashing exhausted retries");
        Err(AuthError::Hashing { attempts })
    }

    /// Check `password` against a stored hash. A mismatch is `Ok(false)`.
    pub async fn verify(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        if !is_bcrypt_hash(hash) {
            return Err(AuthError::MalformedHash);
        }
        let password = normalize(password);
        if password.is_empty() {
            return Ok(false);
        }

        let primitive = Arc::clone(&self.primitive);
        let stored = hash.to_string();
        match tokio::task::spawn_blocking(move || primitive.verify(&password, &stored)).await {
            Ok(Ok(matched)) => Ok(matched),
            Ok(Err(e)) => {
                warn!(detail = %e, "stored hash rejected by primitive");
                Err(AuthError::MalformedHash)
            }
            Err(e) => Err(AuthError::Internal(format!("verification task failed: {e}"))),
        }
    }

    /// Spend one verification's worth of work against a throwaway hash.
    ///
    /// Used when the principal does not exist, so "no such user" and "wrong
    /// password" take the same time.
    pub async fn equalize_timing(&self, password: &str) {
        let dummy = self
            .dummy_hash
            .get_or_try_init(|| self.hash(DUMMY_PASSWORD))
            .await;
        if let Ok(dummy) = dummy {
            let _ = self.verify(password, dummy).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::auth::ErrorKind;

    const TEST_COST: u32 = 4;

    #[derive(Default)]
    struct RecordingSleeper {
        sleeps: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
        }
    }

    /// Fails the first `failures` hash calls, then delegates to bcrypt.
    struct FlakyPrimitive {
        failures: u32,
        hash_calls: AtomicU32,
        verify_calls: AtomicU32,
        fail_verify: bool,
    }

    impl FlakyPrimitive {
        fn failing(failures: u32) -> Self {
            Self {
                failures,
                hash_calls: AtomicU32::new(0),
                verify_calls: AtomicU32::new(0),
                fail_verify: false,
            }
        }
    }

    impl HashPrimitive for FlakyPrimitive {
        fn hash(&self, password: &str, cost: u32) -> Result<String, PrimitiveError> {
            let call = self.hash_calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(PrimitiveError("resource exhausted".into()));
            }
            Bcrypt.hash(password, cost)
        }

        fn verify(&self, password: &str, hash: &str) -> Result<bool, PrimitiveError> {
            self.verify_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_verify {
                return Err(PrimitiveError("resource exhausted".into()));
            }
            Bcrypt.verify(password, hash)
        }
    }

    fn hasher() -> CredentialHasher {
        CredentialHasher::new(TEST_COST)
    }

    #[tokio::test]
    async fn hash_then_verify_roundtrip() {
        let hasher = hasher();
        let hash = hasher.hash("Ab1!abcd").await.unwrap();
        assert!(is_bcrypt_hash(&hash));
        assert!(hasher.verify("Ab1!abcd", &hash).await.unwrap());
        assert!(!hasher.verify("Ab1!abce", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn each_hash_uses_a_fresh_salt() {
        let hasher = hasher();
        let a = hasher.hash("same-password-1").await.unwrap();
        let b = hasher.hash("same-password-1").await.unwrap();
        assert_ne!(a, b);
        assert!(hasher.verify("same-password-1", &a).await.unwrap());
        assert!(hasher.verify("same-password-1", &b).await.unwrap());
    }

    #[tokio::test]
    async fn hashing_and_verification_share_normalization() {
        let hasher = hasher();
        let hash = hasher.hash("  secret99\t\n").await.unwrap();
        assert!(hasher.verify("secret99", &hash).await.unwrap());
        assert!(hasher.verify("secret99\r\n", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn empty_password_is_rejected_before_hashing() {
        let err = hasher().hash(" \t ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn malformed_hash_is_a_distinct_error() {
        let hasher = hasher();
        for bad in [
            "",
            "plaintext",
            "$2b$04$tooshort",
            "$argon2id$v=19$m=65536,t=3,p=4$c2FsdHNhbHQ$aGFzaGhhc2hoYXNoaGFzaA",
            "$3b$04$abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0",
        ] {
            let err = hasher.verify("whatever1", bad).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedHash, "{bad:?}");
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_with_exponential_backoff() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let primitive = Arc::new(FlakyPrimitive::failing(2));
        let hasher = hasher()
            .with_primitive(primitive.clone())
            .with_sleeper(sleeper.clone());

        let hash = hasher.hash("retry-me-1").await.unwrap();
        assert!(hasher.verify("retry-me-1", &hash).await.unwrap());
        assert_eq!(primitive.hash_calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            *sleeper.sleeps.lock().unwrap(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[tokio::test]
    async fn hashing_error_only_after_retries_exhausted() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let primitive = Arc::new(FlakyPrimitive::failing(u32::MAX));
        let hasher = hasher()
            .with_primitive(primitive.clone())
            .with_sleeper(sleeper.clone());

        let err = hasher.hash("never-works-1").await.unwrap_err();
        assert!(matches!(err, AuthError::Hashing { attempts: 4 }));
        assert_eq!(primitive.hash_calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            *sleeper.sleeps.lock().unwrap(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
            ]
        );
    }

    #[tokio::test]
    async fn retry_bound_is_configurable() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let primitive = Arc::new(FlakyPrimitive::failing(u32::MAX));
        let hasher = hasher()
            .with_primitive(primitive.clone())
            .with_sleeper(sleeper)
            .with_max_retries(0);

        let err = hasher.hash("never-works-1").await.unwrap_err();
        assert!(matches!(err, AuthError::Hashing { attempts: 1 }));
        assert_eq!(primitive.hash_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_bound_is_clamped() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let primitive = Arc::new(FlakyPrimitive::failing(u32::MAX));
        let hasher = hasher()
            .with_primitive(primitive.clone())
            .with_sleeper(sleeper.clone())
            .with_max_retries(u32::MAX);

        let err = hasher.hash("never-works-1").await.unwrap_err();
        let limit = MAX_RETRIES_LIMIT + 1;
        assert!(matches!(err, AuthError::Hashing { attempts } if attempts == limit));
        assert_eq!(primitive.hash_calls.load(Ordering::SeqCst), limit);
        let sleeps = sleeper.sleeps.lock().unwrap();
        assert_eq!(sleeps.last(), Some(&Duration::from_millis(100 * 512)));
    }

    #[tokio::test]
    async fn verify_never_retries() {
        let good = hasher().hash("stable-pass-1").await.unwrap();
        let primitive = Arc::new(FlakyPrimitive {
            fail_verify: true,
            ..FlakyPrimitive::failing(0)
        });
        let sleeper = Arc::new(RecordingSleeper::default());
        let hasher = hasher()
            .with_primitive(primitive.clone())
            .with_sleeper(sleeper.clone());

        assert!(hasher.verify("stable-pass-1", &good).await.is_err());
        assert_eq!(primitive.verify_calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.sleeps.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn hashing_error_message_carries_no_password() {
        let hasher = hasher()
            .with_primitive(Arc::new(FlakyPrimitive::failing(u32::MAX)))
            .with_sleeper(Arc::new(RecordingSleeper::default()));
        let err = hasher.hash("TopSecret99").await.unwrap_err();
        assert!(!err.to_string().contains("TopSecret99"));
    }

    #[tokio::test]
    async fn equalize_timing_does_not_fail() {
        let hasher = hasher();
        hasher.equalize_timing("anything1").await;
        hasher.equalize_timing("anything2").await;
        assert!(hasher.dummy_hash.get().is_some());
    }
}
