//! Integration tests: build the router over the in-memory directory and drive
//! it with `oneshot`.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::Utc;
use serde_json::{Value, json};
use tower::ServiceExt;
use warden_api::{AppState, config::ApiConfig};
use warden_core::auth::service::AuthService;
use warden_core::clock::{Clock, ManualClock, SystemClock};
use warden_core::config::AuthConfig;
use warden_core::directory::memory::MemoryDirectory;

const SECRET: &str = "integration-test-secret-0123456789";
const PASSWORD: &str = "Ab1!abcd";

fn test_config() -> AuthConfig {
    let mut config = AuthConfig::new(SECRET);
    config.policy = config.policy.with_cost(4);
    config
}

fn app_with(config: AuthConfig, clock: Arc<dyn Clock>) -> (Router, Arc<AuthService>) {
    let directory = Arc::new(MemoryDirectory::new());
    let auth = Arc::new(AuthService::new(&config, directory.clone(), directory, clock));
    let state = AppState::new(Arc::clone(&auth), ApiConfig::default());
    (warden_api::router(state), auth)
}

fn app() -> (Router, Arc<AuthService>) {
    app_with(test_config(), Arc::new(SystemClock))
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let req = match body {
        Some(body) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };

    let resp = app.clone().oneshot(req).await.expect("request");
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

async fn register(app: &Router, email: &str) -> Value {
    let (status, body) = send(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({"email": email, "password": PASSWORD, "name": "A"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body
}

async fn login(app: &Router, email: &str) -> Value {
    let (status, body) = send(
        app,
        "POST",
        "/auth/login",
        None,
        Some(json!({"email": email, "password": PASSWORD})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body
}

fn access(body: &Value) -> &str {
    body["accessToken"].as_str().expect("accessToken")
}

fn refresh(body: &Value) -> &str {
    body["refreshToken"].as_str().expect("refreshToken")
}

#[tokio::test]
async fn register_returns_tokens_and_rejects_duplicates() {
    let (app, _) = app();
    let body = register(&app, "a@x.com").await;
    assert_eq!(body["email"], "a@x.com");
    assert_eq!(body["name"], "A");
    assert_eq!(body["role"], "user");
    assert_eq!(body["expiresIn"], 900);
    assert!(body["principalId"].is_string());
    assert!(body.get("passwordHash").is_none());
    assert_eq!(access(&body).split('.').count(), 3);

    let (status, body) = send(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({"email": "a@x.com", "password": PASSWORD, "name": "A"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "duplicate_credential");
}

#[tokio::test]
async fn weak_password_is_bad_request_with_violations() {
    let (app, _) = app();
    let (status, body) = send(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({"email": "a@x.com", "password": "abc", "name": "A"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
    assert_eq!(body["violations"], json!(["min length 8", "requires number"]));
}

#[tokio::test]
async fn login_failures_are_generic() {
    let (app, _) = app();
    register(&app, "a@x.com").await;
    login(&app, "A@X.COM").await;

    let (status, wrong) = send(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({"email": "a@x.com", "password": "Wrong1!x"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong["message"], "Invalid credentials");

    let (status, unknown) = send(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({"email": "nobody@x.com", "password": PASSWORD})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong, unknown);
}

#[tokio::test]
async fn me_requires_a_valid_access_token() {
    let (app, _) = app();
    let body = register(&app, "a@x.com").await;

    let (status, me) = send(&app, "GET", "/auth/me", Some(access(&body)), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], "a@x.com");
    assert_eq!(me["isActive"], true);

    let (status, err) = send(&app, "GET", "/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(err["error"], "token_required");
    assert_eq!(err["message"], "Authentication required");

    let (status, err) = send(&app, "GET", "/auth/me", Some("not.a.token"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(err["error"], "token_malformed");
    assert_eq!(err["message"], "Authentication required");

    let (status, err) = send(&app, "GET", "/auth/me", Some(refresh(&body)), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(err["error"], "token_type_mismatch");
}

#[tokio::test]
async fn expired_access_token_is_rejected() {
    let mut config = test_config();
    config.tokens.access_ttl_secs = 1;
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let (app, _) = app_with(config, clock.clone());
    let body = register(&app, "a@x.com").await;

    clock.advance(Duration::from_secs(2));
    let (status, err) = send(&app, "GET", "/auth/me", Some(access(&body)), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(err["error"], "token_expired");
}

#[tokio::test]
async fn refresh_rotates_and_detects_reuse() {
    let (app, _) = app();
    let first = register(&app, "a@x.com").await;

    let (status, second) = send(
        &app,
        "POST",
        "/auth/refresh",
        None,
        Some(json!({"refreshToken": refresh(&first)})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(refresh(&second), refresh(&first));
    let (status, _) = send(&app, "GET", "/auth/me", Some(access(&second)), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, err) = send(
        &app,
        "POST",
        "/auth/refresh",
        None,
        Some(json!({"refreshToken": refresh(&first)})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(err["error"], "refresh_token_reused");
}

#[tokio::test]
async fn concurrent_refresh_has_one_winner() {
    let (app, _) = app();
    let body = register(&app, "a@x.com").await;
    let payload = json!({"refreshToken": refresh(&body)});

    let (a, b) = tokio::join!(
        send(&app, "POST", "/auth/refresh", None, Some(payload.clone())),
        send(&app, "POST", "/auth/refresh", None, Some(payload.clone())),
    );
    let mut statuses = [a.0.as_u16(), b.0.as_u16()];
    statuses.sort();
    assert_eq!(statuses, [200, 401]);
}

#[tokio::test]
async fn logout_consumes_the_refresh_token() {
    let (app, _) = app();
    let body = register(&app, "a@x.com").await;

    let (status, out) = send(
        &app,
        "POST",
        "/auth/logout",
        None,
        Some(json!({"refreshToken": refresh(&body)})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["success"], true);

    let (status, out) = send(
        &app,
        "POST",
        "/auth/logout",
        None,
        Some(json!({"refreshToken": "garbage"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["success"], true);

    let (status, _) = send(
        &app,
        "POST",
        "/auth/refresh",
        None,
        Some(json!({"refreshToken": refresh(&body)})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_routes_forbid_regular_users() {
    let (app, auth) = app();
    let user = register(&app, "u@x.com").await;
    auth.bootstrap_admin("root@x.com", PASSWORD, "Root").await.unwrap();
    let admin = login(&app, "root@x.com").await;

    let (status, err) = send(&app, "GET", "/admin/principals", Some(access(&user)), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(err["error"], "insufficient_privileges");

    let (status, list) = send(&app, "GET", "/admin/principals", Some(access(&admin)), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["principals"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn principals_are_visible_to_owner_and_admin_only() {
    let (app, auth) = app();
    let owner = register(&app, "owner@x.com").await;
    let other = register(&app, "other@x.com").await;
    auth.bootstrap_admin("root@x.com", PASSWORD, "Root").await.unwrap();
    let admin = login(&app, "root@x.com").await;
    let uri = format!("/principals/{}", owner["principalId"].as_str().unwrap());

    let (status, own) = send(&app, "GET", &uri, Some(access(&owner)), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(own["email"], "owner@x.com");

    let (status, err) = send(&app, "GET", &uri, Some(access(&other)), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(err["error"], "resource_ownership");

    let (status, seen) = send(&app, "GET", &uri, Some(access(&admin)), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(seen["email"], "owner@x.com");

    let missing = format!("/principals/{}", warden_core::models::auth::PrincipalId::new());
    let (status, err) = send(&app, "GET", &missing, Some(access(&admin)), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["error"], "not_found");
}

#[tokio::test]
async fn deactivated_principal_loses_access() {
    let (app, auth) = app();
    let user = register(&app, "u@x.com").await;
    auth.bootstrap_admin("root@x.com", PASSWORD, "Root").await.unwrap();
    let admin = login(&app, "root@x.com").await;
    let uri = format!("/admin/principals/{}/active", user["principalId"].as_str().unwrap());

    let (status, updated) = send(
        &app,
        "PATCH",
        &uri,
        Some(access(&admin)),
        Some(json!({"isActive": false})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["isActive"], false);

    let (status, err) = send(&app, "GET", "/auth/me", Some(access(&user)), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(err["error"], "principal_unavailable");

    let (status, err) = send(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({"email": "u@x.com", "password": PASSWORD})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(err["message"], "Invalid credentials");
}
