// @zen-component: AUTH-TokenService
//
//! JWT token issuance and verification (HS256).
//!
//! Access and refresh tokens share one claim shape and differ by `typ` and
//! lifetime. Verification checks, in order: structure, signature, expiry,
//! issuer/audience, token type; each failure has its own error kind.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use super::AuthError;
use crate::clock::Clock;
use crate::directory::{RefreshTokenStore, within};
use crate::models::auth::{
    IssuedToken, Principal, RefreshTokenRecord, TokenClaims, TokenPair, TokenType,
};

/// Access token lifetime: 15 minutes.
pub const DEFAULT_ACCESS_TTL_SECS: i64 = 15 * 60;

/// Refresh token lifetime: 7 days.
pub const DEFAULT_REFRESH_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Refresh issuances between sweeps of expired refresh records.
pub const PURGE_INTERVAL: u64 = 256;

/// Deployment binding and lifetimes for issued tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSettings {
    pub issuer: String,
    pub audience: String,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            issuer: "warden".to_string(),
            audience: "warden-api".to_string(),
            access_ttl_secs: DEFAULT_ACCESS_TTL_SECS,
            refresh_ttl_secs: DEFAULT_REFRESH_TTL_SECS,
        }
    }
}

/// SHA-256 hex digest of a token, used as its storage key.
pub fn token_fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Creates signed access and refresh tokens.
pub struct TokenIssuer {
    encoding: EncodingKey,
    secret: Arc<[u8]>,
    settings: TokenSettings,
    clock: Arc<dyn Clock>,
    refresh_store: Arc<dyn RefreshTokenStore>,
    store_timeout: Duration,
    refresh_issued: AtomicU64,
}

impl TokenIssuer {
    pub fn new(
        secret: &[u8],
        settings: TokenSettings,
        clock: Arc<dyn Clock>,
        refresh_store: Arc<dyn RefreshTokenStore>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            secret: Arc::from(secret),
            settings,
            clock,
            refresh_store,
            store_timeout,
            refresh_issued: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &TokenSettings {
        &self.settings
    }

    /// A verifier bound to the same key material, issuer, audience and clock.
    pub fn verifier(&self) -> TokenVerifier {
        TokenVerifier::new(
            &self.secret,
            &self.settings.issuer,
            &self.settings.audience,
            Arc::clone(&self.clock),
        )
    }

    /// Sign a token of `typ` for `principal` as of `now` (unix seconds).
    ///
    /// Pure: no clock read, no storage.
    pub fn sign(
        &self,
        principal: &Principal,
        typ: TokenType,
        now: i64,
    ) -> Result<IssuedToken, AuthError> {
        let ttl = match typ {
            TokenType::Access => self.settings.access_ttl_secs,
            TokenType::Refresh => self.settings.refresh_ttl_secs,
        };
        let claims = TokenClaims {
            sub: principal.id,
            role: principal.role,
            iat: now,
            exp: now.saturating_add(ttl),
            iss: self.settings.issuer.clone(),
            aud: self.settings.audience.clone(),
            typ,
            jti: Uuid::now_v7(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))?;
        Ok(IssuedToken { token, claims })
    }

    /// Short-lived access token.
    pub fn issue_access_token(&self, principal: &Principal) -> Result<IssuedToken, AuthError> {
        self.sign(principal, TokenType::Access, self.clock.now().timestamp())
    }

    /// Long-lived refresh token; records an unused `RefreshTokenRecord`.
    pub async fn issue_refresh_token(
        &self,
        principal: &Principal,
    ) -> Result<IssuedToken, AuthError> {
        let issued = self.sign(principal, TokenType::Refresh, self.clock.now().timestamp())?;
        let record = RefreshTokenRecord {
            id: issued.claims.jti,
            subject_id: principal.id,
            token_hash: token_fingerprint(&issued.token),
            expires_at: issued.expires_at(),
            used: false,
        };
        within(self.store_timeout, self.refresh_store.store(record)).await?;
        debug!(principal_id = %principal.id, jti = %issued.claims.jti, "refresh token recorded");

        let issued_so_far = self.refresh_issued.fetch_add(1, Ordering::Relaxed) + 1;
        if issued_so_far % PURGE_INTERVAL == 0 {
            if let Err(e) = self.purge_expired().await {
                warn!(error = %e, "refresh record sweep failed");
            }
        }
        Ok(issued)
    }

    /// Delete refresh records that have expired by the issuer's clock.
    pub async fn purge_expired(&self) -> Result<u64, AuthError> {
        let removed = within(
            self.store_timeout,
            self.refresh_store.purge_expired(self.clock.now()),
        )
        .await?;
        debug!(removed, "expired refresh records purged");
        Ok(removed)
    }

    pub async fn issue_pair(&self, principal: &Principal) -> Result<TokenPair, AuthError> {
        let access = self.issue_access_token(principal)?;
        let refresh = self.issue_refresh_token(principal).await?;
        Ok(TokenPair {
            access,
            refresh,
            expires_in: self.settings.access_ttl_secs,
        })
    }
}

/// Decodes and validates tokens. Stateless; safe to share across requests.
#[derive(Clone)]
pub struct TokenVerifier {
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    clock: Arc<dyn Clock>,
}

impl TokenVerifier {
    pub fn new(secret: &[u8], issuer: &str, audience: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret),
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            clock,
        }
    }

    /// Verify `token` and require it to be of `expected` type.
    pub fn verify(&self, token: &str, expected: TokenType) -> Result<TokenClaims, AuthError> {
        if !is_well_formed(token) {
            return Err(AuthError::TokenMalformed);
        }

        // Expiry, issuer and audience are checked below, after the signature,
        // so each gets its own error kind.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let claims = decode::<TokenClaims>(token, &self.decoding, &validation)
            .map_err(|e| match e.kind() {
                JwtErrorKind::InvalidSignature | JwtErrorKind::InvalidAlgorithm => {
                    AuthError::TokenSignatureInvalid
                }
                _ => AuthError::TokenMalformed,
            })?
            .claims;

        if self.clock.now().timestamp() > claims.exp {
            return Err(AuthError::TokenExpired);
        }
        if claims.iss != self.issuer || claims.aud != self.audience {
            return Err(AuthError::TokenIssuerMismatch);
        }
        if claims.typ != expected {
            return Err(AuthError::TokenTypeMismatch {
                expected,
                actual: claims.typ,
            });
        }
        Ok(claims)
    }
}

/// Three non-empty base64url segments.
fn is_well_formed(token: &str) -> bool {
    let segments: Vec<&str> = token.split('.').collect();
    segments.len() == 3
        && segments.iter().all(|s| {
            !s.is_empty()
                && s
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        })
}
