// @zen-component: AUTH-AccessControl
//
//! Authentication middleware: Bearer token extraction, verification, and
//! role gating.

use axum::http::header::AUTHORIZATION;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use warden_core::auth::authorize::{AccessRequirement, bearer_token};
use warden_core::models::auth::Principal;

use crate::AppState;
use crate::error::AppError;

/// Key used to store the loaded principal in request extensions.
#[derive(Debug, Clone)]
pub struct AuthenticatedPrincipal(pub Principal);

async fn gate(
    state: &AppState,
    mut request: Request,
    next: Next,
    required: AccessRequirement,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let principal = state
        .authorizer
        .authorize(bearer_token(header), &required)
        .await?;

    request
        .extensions_mut()
        .insert(AuthenticatedPrincipal(principal));
    Ok(next.run(request).await)
}

/// Axum middleware: any active principal with a valid access token.
pub async fn require_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    gate(&state, request, next, AccessRequirement::authenticated()).await
}

/// Axum middleware: administrators only.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    gate(&state, request, next, AccessRequirement::admin()).await
}
