// @zen-component: AUTH-CredentialService
//
//! Register, login, refresh and logout flows.
//!
//! [`AuthService`] is built once by the process bootstrap from an
//! [`AuthConfig`] and the directory collaborators, and shared behind an `Arc`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::AuthError;
use super::authorize::Authorizer;
use super::jwt::{TokenIssuer, TokenVerifier, token_fingerprint};
use super::password::CredentialHasher;
use super::policy::PasswordPolicy;
use super::throttle::LoginThrottle;
use crate::clock::Clock;
use crate::config::AuthConfig;
use crate::directory::{DirectoryError, RefreshTokenStore, UserDirectory, normalize_email, within};
use crate::models::auth::{
    NewPrincipal, Principal, PrincipalId, Redemption, Role, TokenPair, TokenType,
};

/// Longest accepted display name, in characters.
pub const MAX_NAME_LENGTH: usize = 100;

/// Whether `email` has the `local@domain.tld` shape.
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain.split('.').count() >= 2
        && domain.split('.').all(|label| !label.is_empty())
}

pub struct AuthService {
    policy: PasswordPolicy,
    hasher: CredentialHasher,
    issuer: TokenIssuer,
    verifier: TokenVerifier,
    directory: Arc<dyn UserDirectory>,
    refresh_store: Arc<dyn RefreshTokenStore>,
    throttle: LoginThrottle,
    clock: Arc<dyn Clock>,
    directory_timeout: Duration,
}

impl AuthService {
    pub fn new(
        config: &AuthConfig,
        directory: Arc<dyn UserDirectory>,
        refresh_store: Arc<dyn RefreshTokenStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let issuer = TokenIssuer::new(
            &config.jwt_secret,
            config.tokens.clone(),
            Arc::clone(&clock),
            Arc::clone(&refresh_store),
            config.directory_timeout,
        );
        Self {
            policy: config.policy.clone(),
            hasher: CredentialHasher::new(config.policy.cost())
                .with_max_retries(config.hash_max_retries),
            verifier: issuer.verifier(),
            issuer,
            directory,
            refresh_store,
            throttle: LoginThrottle::new(
                config.login_max_attempts,
                config.login_lockout,
                Arc::clone(&clock),
            ),
            clock,
            directory_timeout: config.directory_timeout,
        }
    }

    /// Replace the credential hasher (custom primitive or sleeper).
    pub fn with_hasher(mut self, hasher: CredentialHasher) -> Self {
        self.hasher = hasher;
        self
    }

    /// Request gate sharing this service's verifier and directory.
    pub fn authorizer(&self) -> Authorizer {
        Authorizer::new(
            self.verifier.clone(),
            Arc::clone(&self.directory),
            self.directory_timeout,
        )
    }

    pub fn policy(&self) -> &PasswordPolicy {
        &self.policy
    }

    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    /// Create a `user` principal and sign it in.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<(Principal, TokenPair), AuthError> {
        let principal = self.create_principal(email, password, name, Role::User).await?;
        let tokens = self.issuer.issue_pair(&principal).await?;
        Ok((principal, tokens))
    }

    /// Create the administrator unless the email is already registered.
    pub async fn bootstrap_admin(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<Principal, AuthError> {
        let existing =
            within(self.directory_timeout, self.directory.find_by_email(email)).await?;
        if let Some(existing) = existing {
            if existing.principal.role != Role::Admin {
                warn!(
                    principal_id = %existing.principal.id,
                    "bootstrap admin email belongs to a non-admin principal"
                );
            }
            return Ok(existing.principal);
        }
        let principal = self.create_principal(email, password, name, Role::Admin).await?;
        info!(principal_id = %principal.id, "bootstrap admin created");
        Ok(principal)
    }

    async fn create_principal(
        &self,
        email: &str,
        password: &str,
        name: &str,
        role: Role,
    ) -> Result<Principal, AuthError> {
        let email = normalize_email(email);
        let name = name.trim();

        let mut violations = Vec::new();
        if !is_valid_email(&email) {
            violations.push("invalid email".to_string());
        }
        if name.is_empty() {
            violations.push("name required".to_string());
        } else if name.chars().count() > MAX_NAME_LENGTH {
            violations.push(format!("name max length {MAX_NAME_LENGTH}"));
        }
        violations.extend(self.policy.validate(password).violations);
        if !violations.is_empty() {
            debug!(count = violations.len(), "registration rejected");
            return Err(AuthError::validation(violations));
        }

        let password_hash = self.hasher.hash(password).await?;
        let principal = within(
            self.directory_timeout,
            self.directory.create(NewPrincipal {
                email: email.clone(),
                name: name.to_string(),
                role,
                password_hash,
            }),
        )
        .await
        .inspect_err(|e| {
            if matches!(e, DirectoryError::DuplicateEmail) {
                info!(email = %email, "registration for existing email");
            }
        })?;

        info!(
            principal_id = %principal.id,
            email = %principal.email,
            role = %principal.role,
            "principal registered"
        );
        Ok(principal)
    }

    /// Exchange email + password for a token pair.
    ///
    /// Unknown email, wrong password and deactivated principal all fail with
    /// the same `InvalidCredentials` after the same amount of hashing work.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(Principal, TokenPair), AuthError> {
        let email = normalize_email(email);
        let attempt = self.throttle.admit(&email)?;

        let found = within(self.directory_timeout, self.directory.find_by_email(&email)).await?;
        let accepted = match found {
            Some(found) => {
                let matched = self.hasher.verify(password, &found.password_hash).await?;
                (matched && found.principal.is_active).then_some(found.principal)
            }
            None => {
                self.hasher.equalize_timing(password).await;
                None
            }
        };

        let Some(principal) = accepted else {
            attempt.failed();
            info!(email = %email, "login failed");
            return Err(AuthError::InvalidCredentials);
        };

        attempt.succeeded();
        let tokens = self.issuer.issue_pair(&principal).await?;
        info!(principal_id = %principal.id, "login succeeded");
        Ok((principal, tokens))
    }

    /// Redeem a refresh token for a rotated pair.
    ///
    /// A token that was already redeemed revokes every refresh token of its
    /// subject and fails with `RefreshTokenReused`.
    pub async fn refresh(&self, refresh_token: &str) -> Result<(Principal, TokenPair), AuthError> {
        self.verifier.verify(refresh_token, TokenType::Refresh)?;

        let redemption = within(
            self.directory_timeout,
            self.refresh_store
                .redeem(&token_fingerprint(refresh_token), self.clock.now()),
        )
        .await?;

        let subject = match redemption {
            Redemption::Redeemed(subject) => subject,
            Redemption::AlreadyUsed(subject) => {
                let revoked =
                    within(self.directory_timeout, self.refresh_store.revoke_all(subject)).await?;
                warn!(
                    principal_id = %subject,
                    revoked,
                    "refresh token reuse detected, sessions revoked"
                );
                return Err(AuthError::RefreshTokenReused);
            }
            // No live record: the client has to sign in again.
            Redemption::Unknown => return Err(AuthError::TokenExpired),
        };

        let principal = within(self.directory_timeout, self.directory.find_by_id(subject))
            .await?
            .filter(|p| p.is_active)
            .ok_or(AuthError::PrincipalUnavailable)?;
        let tokens = self.issuer.issue_pair(&principal).await?;
        debug!(principal_id = %principal.id, "refresh token rotated");
        Ok((principal, tokens))
    }

    /// Consume a refresh token. Tokens that do not verify are ignored.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        let Ok(claims) = self.verifier.verify(refresh_token, TokenType::Refresh) else {
            return Ok(());
        };
        within(
            self.directory_timeout,
            self.refresh_store
                .redeem(&token_fingerprint(refresh_token), self.clock.now()),
        )
        .await?;
        info!(principal_id = %claims.sub, "logged out");
        Ok(())
    }

    pub async fn get(&self, id: PrincipalId) -> Result<Option<Principal>, AuthError> {
        Ok(within(self.directory_timeout, self.directory.find_by_id(id)).await?)
    }

    pub async fn list(&self) -> Result<Vec<Principal>, AuthError> {
        Ok(within(self.directory_timeout, self.directory.list()).await?)
    }

    /// Administrative activation toggle. `None` when the principal is unknown.
    pub async fn set_active(
        &self,
        id: PrincipalId,
        active: bool,
    ) -> Result<Option<Principal>, AuthError> {
        match within(self.directory_timeout, self.directory.set_active(id, active)).await {
            Ok(principal) => {
                info!(principal_id = %id, active, "principal activation changed");
                Ok(Some(principal))
            }
            Err(DirectoryError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ErrorKind;
    use crate::auth::authorize::AccessRequirement;
    use crate::clock::SystemClock;
    use crate::directory::memory::MemoryDirectory;

    const SECRET: &str = "service-test-secret-0123456789abcdef";
    const PASSWORD: &str = "Ab1!abcd";

    fn config() -> AuthConfig {
        let mut config = AuthConfig::new(SECRET);
        config.policy = config.policy.with_cost(4);
        config.login_max_attempts = 3;
        config
    }

    fn service_with(config: AuthConfig) -> (Arc<AuthService>, Arc<MemoryDirectory>) {
        let directory = Arc::new(MemoryDirectory::new());
        let service = AuthService::new(
            &config,
            directory.clone(),
            directory.clone(),
            Arc::new(SystemClock),
        );
        (Arc::new(service), directory)
    }

    fn service() -> (Arc<AuthService>, Arc<MemoryDirectory>) {
        service_with(config())
    }

    #[test]
    fn email_shape() {
        assert!(is_valid_email("a@x.com"));
        assert!(is_valid_email("first.last@mail.example.org"));
        for bad in ["", "a", "a@", "@x.com", "a@x", "a@x.", "a@.com", "a b@x.com", "a@b@x.com"] {
            assert!(!is_valid_email(bad), "{bad:?}");
        }
    }

    #[tokio::test]
    async fn register_then_duplicate_is_conflict() {
        let (service, _) = service();
        let (principal, tokens) = service.register("a@x.com", PASSWORD, "A").await.unwrap();
        assert_eq!(principal.email, "a@x.com");
        assert_eq!(principal.role, Role::User);
        assert!(principal.is_active);
        assert_eq!(tokens.expires_in, 900);
        assert_eq!(tokens.access.claims.sub, principal.id);

        let err = service.register("A@X.com ", PASSWORD, "A").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateCredential);
        assert_eq!(err.status_code(), 409);
    }

    #[tokio::test]
    async fn weak_password_lists_every_violation() {
        let (service, directory) = service();
        let err = service.register("a@x.com", "abc", "A").await.unwrap_err();
        match err {
            AuthError::Validation { violations } => {
                assert_eq!(violations, vec!["min length 8", "requires number"]);
            }
            other => panic!("unexpected: {other}"),
        }
        assert!(directory.is_empty());
    }

    #[tokio::test]
    async fn email_and_name_violations_come_first() {
        let (service, _) = service();
        let err = service.register("nope", "abc", "  ").await.unwrap_err();
        let AuthError::Validation { violations } = err else {
            panic!("expected validation error");
        };
        assert_eq!(
            violations,
            vec!["invalid email", "name required", "min length 8", "requires number"]
        );

        let long_name = "n".repeat(MAX_NAME_LENGTH + 1);
        let err = service.register("a@x.com", PASSWORD, &long_name).await.unwrap_err();
        assert_eq!(err.to_string(), "Validation error: name max length 100");
    }

    #[tokio::test]
    async fn registered_tokens_verify_by_type() {
        let (service, _) = service();
        let (principal, tokens) = service.register("a@x.com", PASSWORD, "A").await.unwrap();
        let verifier = service.verifier();
        assert_eq!(
            verifier.verify(&tokens.access.token, TokenType::Access).unwrap().sub,
            principal.id
        );
        assert_eq!(
            verifier.verify(&tokens.refresh.token, TokenType::Refresh).unwrap().sub,
            principal.id
        );
        let err = verifier.verify(&tokens.refresh.token, TokenType::Access).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TokenTypeMismatch);
    }

    #[tokio::test]
    async fn login_uses_the_normalized_password() {
        let (service, _) = service();
        service.register("a@x.com", " Ab1!abcd\t", "A").await.unwrap();
        let (principal, _) = service.login("A@x.com", PASSWORD).await.unwrap();
        assert_eq!(principal.email, "a@x.com");
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let (service, directory) = service();
        let (p, _) = service.register("a@x.com", PASSWORD, "A").await.unwrap();
        service.register("off@x.com", PASSWORD, "B").await.unwrap();
        let off = directory.find_by_email("off@x.com").await.unwrap().unwrap();
        directory.set_active(off.principal.id, false).await.unwrap();

        let wrong = service.login("a@x.com", "Wrong1!x").await.unwrap_err();
        let unknown = service.login("nobody@x.com", PASSWORD).await.unwrap_err();
        let inactive = service.login("off@x.com", PASSWORD).await.unwrap_err();
        for err in [&wrong, &unknown, &inactive] {
            assert_eq!(err.kind(), ErrorKind::InvalidCredentials);
            assert_eq!(err.to_string(), "Invalid credentials");
        }
        assert!(service.login("a@x.com", PASSWORD).await.is_ok());
        assert!(directory.find_by_id(p.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn repeated_failures_lock_the_account() {
        let (service, _) = service();
        service.register("a@x.com", PASSWORD, "A").await.unwrap();
        for _ in 0..3 {
            let err = service.login("a@x.com", "Wrong1!x").await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidCredentials);
        }
        let err = service.login("a@x.com", PASSWORD).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccountLocked);
        assert_eq!(err.status_code(), 429);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_guesses_cannot_outrun_the_lockout() {
        let (service, _) = service();
        service.register("a@x.com", PASSWORD, "A").await.unwrap();

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let service = Arc::clone(&service);
                tokio::spawn(async move { service.login("a@x.com", "Wrong1!x").await })
            })
            .collect();

        let mut evaluated = 0;
        let mut locked = 0;
        for h in handles {
            match h.await.unwrap() {
                Err(AuthError::InvalidCredentials) => evaluated += 1,
                Err(AuthError::AccountLocked { .. }) => locked += 1,
                Ok(_) => panic!("wrong password accepted"),
                Err(e) => panic!("unexpected: {e}"),
            }
        }
        assert!(evaluated <= 3, "{evaluated} guesses evaluated");
        assert_eq!(evaluated + locked, 32);

        let err = service.login("a@x.com", PASSWORD).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccountLocked);
    }

    #[tokio::test]
    async fn successful_login_resets_failures() {
        let (service, _) = service();
        service.register("a@x.com", PASSWORD, "A").await.unwrap();
        for _ in 0..2 {
            service.login("a@x.com", "Wrong1!x").await.unwrap_err();
        }
        service.login("a@x.com", PASSWORD).await.unwrap();
        for _ in 0..2 {
            service.login("a@x.com", "Wrong1!x").await.unwrap_err();
        }
        assert!(service.login("a@x.com", PASSWORD).await.is_ok());
    }

    #[tokio::test]
    async fn refresh_rotates_and_reuse_revokes_everything() {
        let (service, directory) = service();
        let (principal, first) = service.register("a@x.com", PASSWORD, "A").await.unwrap();

        let (refreshed, second) = service.refresh(&first.refresh.token).await.unwrap();
        assert_eq!(refreshed.id, principal.id);
        assert_ne!(second.refresh.token, first.refresh.token);
        assert!(directory.refresh_record(&token_fingerprint(&first.refresh.token)).unwrap().used);

        let err = service.refresh(&first.refresh.token).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RefreshTokenReused);
        assert_eq!(err.status_code(), 401);

        // The rotated token was revoked along with the rest.
        let err = service.refresh(&second.refresh.token).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RefreshTokenReused);
    }

    #[tokio::test]
    async fn access_tokens_cannot_refresh() {
        let (service, _) = service();
        let (_, tokens) = service.register("a@x.com", PASSWORD, "A").await.unwrap();
        let err = service.refresh(&tokens.access.token).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TokenTypeMismatch);
    }

    #[tokio::test]
    async fn unrecorded_refresh_token_is_rejected() {
        let (service, _) = service();
        let (principal, _) = service.register("a@x.com", PASSWORD, "A").await.unwrap();
        let now = chrono::Utc::now().timestamp();
        let unrecorded = service.issuer().sign(&principal, TokenType::Refresh, now).unwrap();
        let err = service.refresh(&unrecorded.token).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TokenExpired);
    }

    #[tokio::test]
    async fn deactivated_principal_cannot_refresh() {
        let (service, _) = service();
        let (principal, tokens) = service.register("a@x.com", PASSWORD, "A").await.unwrap();
        service.set_active(principal.id, false).await.unwrap();
        let err = service.refresh(&tokens.refresh.token).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PrincipalUnavailable);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_refreshes_yield_one_success() {
        let (service, _) = service();
        let (_, tokens) = service.register("a@x.com", PASSWORD, "A").await.unwrap();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let service = Arc::clone(&service);
                let token = tokens.refresh.token.clone();
                tokio::spawn(async move { service.refresh(&token).await })
            })
            .collect();

        let mut ok = 0;
        let mut unauthorized = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) if e.status_code() == 401 => unauthorized += 1,
                Err(e) => panic!("unexpected: {e}"),
            }
        }
        assert_eq!((ok, unauthorized), (1, 1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registrations_yield_one_principal() {
        let (service, directory) = service();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let service = Arc::clone(&service);
                tokio::spawn(async move { service.register("race@x.com", PASSWORD, "R").await })
            })
            .collect();

        let mut ok = 0;
        let mut duplicate = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(AuthError::DuplicateCredential) => duplicate += 1,
                Err(e) => panic!("unexpected: {e}"),
            }
        }
        assert_eq!((ok, duplicate), (1, 3));
        assert_eq!(directory.len(), 1);
    }

    #[tokio::test]
    async fn logout_consumes_the_refresh_token() {
        let (service, directory) = service();
        let (_, tokens) = service.register("a@x.com", PASSWORD, "A").await.unwrap();
        service.logout(&tokens.refresh.token).await.unwrap();
        assert!(directory.refresh_record(&token_fingerprint(&tokens.refresh.token)).unwrap().used);

        // Idempotent, and garbage is ignored.
        service.logout(&tokens.refresh.token).await.unwrap();
        service.logout("not.a.token").await.unwrap();
        service.logout(&tokens.access.token).await.unwrap();
    }

    #[tokio::test]
    async fn bootstrap_admin_is_idempotent() {
        let (service, directory) = service();
        let admin = service.bootstrap_admin("root@x.com", PASSWORD, "Root").await.unwrap();
        assert_eq!(admin.role, Role::Admin);
        let again = service.bootstrap_admin("ROOT@x.com", PASSWORD, "Root").await.unwrap();
        assert_eq!(again.id, admin.id);
        assert_eq!(directory.len(), 1);

        let (_, tokens) = service.login("root@x.com", PASSWORD).await.unwrap();
        let authorized = service
            .authorizer()
            .authorize(Some(&tokens.access.token), &AccessRequirement::admin())
            .await
            .unwrap();
        assert_eq!(authorized.id, admin.id);
    }

    #[tokio::test]
    async fn set_active_on_unknown_principal_is_none() {
        let (service, _) = service();
        assert!(service.set_active(PrincipalId::new(), false).await.unwrap().is_none());
        assert!(service.get(PrincipalId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_returns_every_principal() {
        let (service, _) = service();
        service.register("a@x.com", PASSWORD, "A").await.unwrap();
        service.register("b@x.com", PASSWORD, "B").await.unwrap();
        let emails: Vec<String> = service
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.email)
            .collect();
        assert_eq!(emails.len(), 2);
        assert!(emails.contains(&"a@x.com".to_string()));
    }
}
