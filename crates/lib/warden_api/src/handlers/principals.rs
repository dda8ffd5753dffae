//! Principal lookup and administration handlers.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use warden_core::auth::authorize::{AccessRequirement, check};
use warden_core::models::auth::PrincipalId;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedPrincipal;
use crate::models::{PrincipalListResponse, PrincipalResponse, SetActiveRequest};

/// `GET /principals/{id}`: owner or administrator only.
pub async fn get_principal_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedPrincipal(caller)): Extension<AuthenticatedPrincipal>,
    Path(id): Path<PrincipalId>,
) -> AppResult<Json<PrincipalResponse>> {
    check(&caller, &AccessRequirement::authenticated().owned_by(id))?;
    let principal = state
        .auth
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("principal {id}")))?;
    Ok(Json(principal.into()))
}

/// `GET /admin/principals`: every principal.
pub async fn list_principals_handler(
    State(state): State<AppState>,
) -> AppResult<Json<PrincipalListResponse>> {
    let principals = state
        .auth
        .list()
        .await?
        .into_iter()
        .map(PrincipalResponse::from)
        .collect();
    Ok(Json(PrincipalListResponse { principals }))
}

/// `PATCH /admin/principals/{id}/active`: activate or deactivate.
pub async fn set_active_handler(
    State(state): State<AppState>,
    Path(id): Path<PrincipalId>,
    Json(body): Json<SetActiveRequest>,
) -> AppResult<Json<PrincipalResponse>> {
    let principal = state
        .auth
        .set_active(id, body.is_active)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("principal {id}")))?;
    Ok(Json(principal.into()))
}
