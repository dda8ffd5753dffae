// @zen-component: AUTH-AccessControl
//
//! Per-request authorization.
//!
//! A request moves `Unauthenticated → TokenVerified → PrincipalLoaded →
//! Authorized | Forbidden`. Authentication failures are 401-kind errors,
//! role and ownership failures are 403-kind. Nothing here mutates state, so
//! one [`Authorizer`] serves any number of concurrent requests.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::AuthError;
use super::jwt::TokenVerifier;
use crate::directory::{UserDirectory, within};
use crate::models::auth::{AuthorizationDecision, Principal, PrincipalId, Role, TokenType};

/// What a request needs from the principal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessRequirement {
    /// Accepted roles; empty means any authenticated principal.
    pub roles: Vec<Role>,
    /// Owner of the targeted resource, when the request targets one.
    pub resource_owner: Option<PrincipalId>,
}

impl AccessRequirement {
    /// Any active, authenticated principal.
    pub fn authenticated() -> Self {
        Self::default()
    }

    pub fn any_of(roles: &[Role]) -> Self {
        Self {
            roles: roles.to_vec(),
            resource_owner: None,
        }
    }

    pub fn admin() -> Self {
        Self::any_of(&[Role::Admin])
    }

    pub fn owned_by(mut self, owner: PrincipalId) -> Self {
        self.resource_owner = Some(owner);
        self
    }
}

/// Role and ownership checks over a loaded principal.
///
/// Administrators skip the ownership check; everyone else must own the
/// targeted resource.
pub fn check(
    principal: &Principal,
    required: &AccessRequirement,
) -> Result<AuthorizationDecision, AuthError> {
    if !required.roles.is_empty() && !required.roles.contains(&principal.role) {
        let required = required
            .roles
            .iter()
            .map(Role::as_str)
            .collect::<Vec<_>>()
            .join("|");
        return Err(AuthError::InsufficientPrivileges { required });
    }

    match required.resource_owner {
        None => Ok(AuthorizationDecision::allow(format!(
            "role {} permitted",
            principal.role
        ))),
        Some(_) if principal.role.is_admin() => {
            Ok(AuthorizationDecision::allow("administrator bypasses ownership"))
        }
        Some(owner) if owner == principal.id => {
            Ok(AuthorizationDecision::allow("principal owns resource"))
        }
        Some(_) => Err(AuthError::ResourceOwnership),
    }
}

/// [`check`] folded into a decision value.
pub fn decide(principal: &Principal, required: &AccessRequirement) -> AuthorizationDecision {
    check(principal, required).unwrap_or_else(|e| AuthorizationDecision::deny(e.to_string()))
}

/// Token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    let (scheme, token) = header?.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Authentication + authorization gate.
#[derive(Clone)]
pub struct Authorizer {
    verifier: TokenVerifier,
    directory: Arc<dyn UserDirectory>,
    directory_timeout: Duration,
}

impl Authorizer {
    pub fn new(
        verifier: TokenVerifier,
        directory: Arc<dyn UserDirectory>,
        directory_timeout: Duration,
    ) -> Self {
        Self {
            verifier,
            directory,
            directory_timeout,
        }
    }

    /// Verify the bearer token, load its principal, and apply `required`.
    pub async fn authorize(
        &self,
        token: Option<&str>,
        required: &AccessRequirement,
    ) -> Result<Principal, AuthError> {
        let token = token.ok_or(AuthError::TokenRequired)?;
        let claims = self.verifier.verify(token, TokenType::Access).map_err(|e| {
            debug!(kind = e.kind().code(), "token rejected");
            e
        })?;

        let principal = within(self.directory_timeout, self.directory.find_by_id(claims.sub))
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| {
                debug!(principal_id = %claims.sub, "principal missing or inactive");
                AuthError::PrincipalUnavailable
            })?;

        let decision = check(&principal, required).map_err(|e| {
            debug!(principal_id = %principal.id, kind = e.kind().code(), "request forbidden");
            e
        })?;
        debug!(principal_id = %principal.id, reason = %decision.reason, "request authorized");
        Ok(principal)
    }
}
