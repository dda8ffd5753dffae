// @zen-component: AUTH-LoginEndpoint
// @zen-component: AUTH-RegistrationEndpoint
// @zen-component: AUTH-TokenRefreshEndpoint
//
//! Authentication request handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::auth::AuthenticatedPrincipal;
use crate::models::{
    LoginRequest, LogoutRequest, LogoutResponse, PrincipalResponse, RefreshRequest,
    RegisterRequest, TokenResponse,
};

/// `POST /auth/register`: create a `user` principal and sign it in.
pub async fn register_handler(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<TokenResponse>)> {
    let (principal, tokens) = state
        .auth
        .register(&body.email, &body.password, &body.name)
        .await?;
    Ok((StatusCode::CREATED, Json(TokenResponse::new(principal, tokens))))
}

/// `POST /auth/login`: authenticate with email + password.
pub async fn login_handler(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    let (principal, tokens) = state.auth.login(&body.email, &body.password).await?;
    Ok(Json(TokenResponse::new(principal, tokens)))
}

/// `POST /auth/refresh`: exchange a refresh token for a rotated pair.
pub async fn refresh_handler(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> AppResult<Json<TokenResponse>> {
    let (principal, tokens) = state.auth.refresh(&body.refresh_token).await?;
    Ok(Json(TokenResponse::new(principal, tokens)))
}

/// `POST /auth/logout`: consume a refresh token.
pub async fn logout_handler(
    State(state): State<AppState>,
    Json(body): Json<LogoutRequest>,
) -> AppResult<Json<LogoutResponse>> {
    state.auth.logout(&body.refresh_token).await?;
    Ok(Json(LogoutResponse { success: true }))
}

/// `GET /auth/me`: the authenticated principal.
pub async fn me_handler(
    Extension(AuthenticatedPrincipal(principal)): Extension<AuthenticatedPrincipal>,
) -> Json<PrincipalResponse> {
    Json(principal.into())
}
