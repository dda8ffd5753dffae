//! # warden_api
//!
//! HTTP API library for Warden.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post};
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use warden_core::auth::authorize::Authorizer;
use warden_core::auth::service::AuthService;

use crate::config::ApiConfig;
use crate::handlers::{auth, principals};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    /// Request gate used by the auth middleware.
    pub authorizer: Authorizer,
    /// API configuration.
    pub config: ApiConfig,
}

impl AppState {
    pub fn new(auth: Arc<AuthService>, config: ApiConfig) -> Self {
        Self {
            authorizer: auth.authorizer(),
            auth,
            config,
        }
    }
}

/// Run embedded database migrations.
///
/// Delegates to `warden_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    warden_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no auth required)
    let public = Router::new()
        .route("/auth/register", post(auth::register_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/refresh", post(auth::refresh_handler))
        .route("/auth/logout", post(auth::logout_handler));

    // Any authenticated principal
    let protected = Router::new()
        .route("/auth/me", get(auth::me_handler))
        .route("/principals/{id}", get(principals::get_principal_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    // Administrators only
    let admin = Router::new()
        .route("/admin/principals", get(principals::list_principals_handler))
        .route(
            "/admin/principals/{id}/active",
            patch(principals::set_active_handler),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_admin,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .merge(admin)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
