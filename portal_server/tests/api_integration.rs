//! Integration tests for the auth HTTP API.
//!
//! Every test drives the real router over an in-memory store and a manual
//! clock.

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode, header};
use chrono::Duration;
use http_body_util::BodyExt;
use portal_auth::{
    AuthManager,
    auth::TokenConfig,
    cleanup::{AuditLog, MemoryAuditLog, ServerCleanup},
    clock::ManualClock,
    db::{MemoryUserDirectory, UserRecord},
    session::{MemorySessionStore, SessionStore},
};
use portal_server::api::{AppState, create_router, rate_limiter::LoginRateLimiter};
use portal_server::config::CookieConfig;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt; // For `oneshot` method

const PASSWORD: &str = "Secret123";

struct TestApp {
    router: Router,
    clock: Arc<ManualClock>,
    store: Arc<dyn SessionStore>,
    audit: Arc<MemoryAuditLog>,
}

/// Helper to create a router with two seeded users: a student (id 1) and an admin (id 2)
async fn create_test_app(max_login_failures: usize) -> TestApp {
    let clock = Arc::new(ManualClock::starting_now());
    let directory = Arc::new(MemoryUserDirectory::new());
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new(clock.clone()));
    let config = TokenConfig::new(
        "integration_test_secret_key_32_chars_min",
        "integration_pepper",
    );
    let auth_manager = Arc::new(AuthManager::new(
        directory.clone(),
        store.clone(),
        clock.clone(),
        config,
    ));

    let hash = auth_manager.hash_password(PASSWORD).unwrap();
    directory
        .insert(UserRecord::new(1, "ana@portal.test", "Ana", "student", hash.clone()))
        .await;
    directory
        .insert(UserRecord::new(2, "root@portal.test", "Root", "admin", hash))
        .await;

    let audit = Arc::new(MemoryAuditLog::new(64));
    let cleanup = ServerCleanup::new(store.clone(), audit.clone(), clock.clone());

    let state = AppState {
        auth_manager,
        cleanup,
        login_limiter: Arc::new(LoginRateLimiter::new(
            max_login_failures,
            std::time::Duration::from_secs(300),
        )),
        cookies: Arc::new(CookieConfig {
            enabled: true,
            secure: false,
            paths: vec!["/".to_string(), "/api".to_string()],
        }),
    };

    TestApp {
        router: create_router(state),
        clock,
        store,
        audit,
    }
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn bearer_request(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, body)
}

fn set_cookies(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

async fn login(app: &TestApp, email: &str) -> Value {
    let (status, _, body) = send(
        &app.router,
        json_request(
            "POST",
            "/auth/login",
            json!({"email": email, "password": PASSWORD}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    body
}

// ============================================================================
// Health Check Tests
// ============================================================================

#[tokio::test]
async fn test_health_check_endpoint() {
    let app = create_test_app(5).await;

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"], true);
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let app = create_test_app(5).await;

    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "trace-7")
        .body(Body::empty())
        .unwrap();
    let (_, headers, _) = send(&app.router, request).await;
    assert_eq!(headers.get("x-request-id").unwrap(), "trace-7");

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (_, headers, _) = send(&app.router, request).await;
    assert!(headers.get("x-request-id").is_some());
}

// ============================================================================
// Login Tests
// ============================================================================

#[tokio::test]
async fn test_login_returns_pair_and_sets_cookies() {
    let app = create_test_app(5).await;

    let (status, headers, body) = send(
        &app.router,
        json_request(
            "POST",
            "/api/auth/login",
            json!({"email": "ana@portal.test", "password": PASSWORD, "rememberMe": true}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["token"].as_str().unwrap().contains('.'));
    assert_eq!(body["refreshToken"].as_str().unwrap().len(), 64);
    assert_eq!(body["user"]["email"], "ana@portal.test");
    assert_eq!(body["expiresIn"], 3600);
    assert_eq!(body["refreshExpiresIn"], 7 * 24 * 3600);

    let cookies = set_cookies(&headers);
    assert_eq!(cookies.len(), 2);
    assert!(cookies.iter().all(|c| c.contains("HttpOnly; SameSite=Strict")));
    assert!(cookies[0].starts_with("access_token="));
    assert_eq!(app.store.stats().await.unwrap().sessions, 1);
}

#[tokio::test]
async fn test_login_error_codes() {
    let app = create_test_app(5).await;

    let (status, _, body) = send(
        &app.router,
        json_request("POST", "/auth/login", json!({"email": "ana@portal.test"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "MISSING_CREDENTIALS");

    let (status, _, wrong_password) = send(
        &app.router,
        json_request(
            "POST",
            "/auth/login",
            json!({"email": "ana@portal.test", "password": "nope"}),
        ),
    )
    .await;
    let (_, _, unknown_user) = send(
        &app.router,
        json_request(
            "POST",
            "/auth/login",
            json!({"email": "ghost@portal.test", "password": PASSWORD}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_password["code"], "INVALID_CREDENTIALS");
    assert_eq!(wrong_password, unknown_user);
}

#[tokio::test]
async fn test_login_rate_limited_after_failures() {
    let app = create_test_app(2).await;
    let bad = json!({"email": "ana@portal.test", "password": "wrong"});

    for _ in 0..2 {
        let (status, _, _) = send(&app.router, json_request("POST", "/auth/login", bad.clone())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, _, body) = send(
        &app.router,
        json_request(
            "POST",
            "/auth/login",
            json!({"email": "ana@portal.test", "password": PASSWORD}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "TOO_MANY_ATTEMPTS");
}

// ============================================================================
// Refresh Tests
// ============================================================================

#[tokio::test]
async fn test_refresh_rotates_and_replay_conflicts() {
    let app = create_test_app(5).await;
    let session = login(&app, "ana@portal.test").await;
    let first = session["refreshToken"].as_str().unwrap().to_string();

    let (status, headers, body) = send(
        &app.router,
        json_request("POST", "/auth/refresh", json!({"refreshToken": first})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["sessionId"], session["sessionId"]);
    assert_ne!(body["refreshToken"].as_str().unwrap(), first);
    assert!(body["accessToken"].is_string());
    assert_eq!(set_cookies(&headers).len(), 2);

    let (status, headers, body) = send(
        &app.router,
        json_request("POST", "/auth/refresh", json!({"refreshToken": first})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "REFRESH_CONFLICT");
    let cleared = set_cookies(&headers);
    assert_eq!(cleared.len(), 4);
    assert!(cleared.iter().all(|c| c.contains("Max-Age=0")));
}

#[tokio::test]
async fn test_refresh_with_tampered_token_is_invalid() {
    let app = create_test_app(5).await;
    let session = login(&app, "ana@portal.test").await;
    let tampered = format!("{}x", session["refreshToken"].as_str().unwrap());

    let (status, _, body) = send(
        &app.router,
        json_request("POST", "/auth/refresh", json!({"refreshToken": tampered})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "INVALID_REFRESH_TOKEN");

    // The untouched token still works
    let (status, _, _) = send(
        &app.router,
        json_request(
            "POST",
            "/auth/refresh",
            json!({"refreshToken": session["refreshToken"]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_refresh_reads_cookie_when_body_is_empty() {
    let app = create_test_app(5).await;
    let session = login(&app, "ana@portal.test").await;

    let request = Request::builder()
        .method("POST")
        .uri("/auth/refresh")
        .header(
            header::COOKIE,
            format!(
                "theme=dark; refresh_token={}",
                session["refreshToken"].as_str().unwrap()
            ),
        )
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessionId"], session["sessionId"]);
}

#[tokio::test]
async fn test_concurrent_refreshes_have_one_winner() {
    let app = create_test_app(5).await;
    let session = login(&app, "ana@portal.test").await;
    let token = session["refreshToken"].as_str().unwrap().to_string();

    let mut handles = Vec::new();
    for _ in 0..5 {
        let router = app.router.clone();
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            send(
                &router,
                json_request("POST", "/auth/refresh", json!({"refreshToken": token})),
            )
            .await
        }));
    }

    let mut ok = 0;
    for handle in handles {
        let (status, _, body) = handle.await.unwrap();
        if status == StatusCode::OK {
            ok += 1;
        } else {
            assert_eq!(body["code"], "REFRESH_CONFLICT");
        }
    }
    assert_eq!(ok, 1);
}

// ============================================================================
// Validate Tests
// ============================================================================

#[tokio::test]
async fn test_validate_until_expiry() {
    let app = create_test_app(5).await;
    let session = login(&app, "ana@portal.test").await;
    let token = session["token"].as_str().unwrap();

    let (status, _, body) = send(&app.router, bearer_request("GET", "/auth/validate", token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert_eq!(body["user"]["id"], 1);
    assert_eq!(body["user"]["name"], "Ana");
    assert_eq!(body["user"]["role"], "student");

    app.clock.advance(Duration::seconds(3600));
    let (status, _, body) = send(&app.router, bearer_request("GET", "/auth/validate", token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "EXPIRED_TOKEN");
}

#[tokio::test]
async fn test_validate_without_token() {
    let app = create_test_app(5).await;
    let request = Request::builder()
        .uri("/auth/validate")
        .body(Body::empty())
        .unwrap();

    let (status, _, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "INVALID_TOKEN");
}

// ============================================================================
// Logout Tests
// ============================================================================

#[tokio::test]
async fn test_logout_is_best_effort_and_closes_session() {
    let app = create_test_app(5).await;
    let session = login(&app, "ana@portal.test").await;
    let token = session["token"].as_str().unwrap();

    let (status, _, _) = send(&app.router, bearer_request("GET", "/auth/me", token)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, headers, body) = send(
        &app.router,
        json_request("POST", "/auth/logout", json!({"sessionId": session["sessionId"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessionsCleared"], 1);
    assert!(set_cookies(&headers).iter().all(|c| c.contains("Max-Age=0")));

    // Protected routes reject the still-unexpired access token
    let (status, _, _) = send(&app.router, bearer_request("GET", "/auth/me", token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Repeating and sending nothing at all both succeed
    let (status, _, body) = send(
        &app.router,
        json_request("POST", "/auth/logout", json!({"sessionId": session["sessionId"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessionsCleared"], 0);

    let request = Request::builder()
        .method("POST")
        .uri("/api/auth/logout")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_logout_by_bearer_token() {
    let app = create_test_app(5).await;
    let session = login(&app, "ana@portal.test").await;

    let (status, _, body) = send(
        &app.router,
        bearer_request("POST", "/auth/logout", session["token"].as_str().unwrap()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessionsCleared"], 1);
    assert_eq!(app.store.stats().await.unwrap().sessions, 0);
}

// ============================================================================
// Emergency Cleanup Tests
// ============================================================================

#[tokio::test]
async fn test_emergency_cleanup_rejects_unknown_action() {
    let app = create_test_app(5).await;

    let (status, _, body) = send(
        &app.router,
        json_request("POST", "/auth/emergency-cleanup", json!({"action": "nuke"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_ACTION");
}

#[tokio::test]
async fn test_emergency_cleanup_by_session_is_idempotent() {
    let app = create_test_app(5).await;
    let session = login(&app, "ana@portal.test").await;
    let cleanup = json!({"action": "full", "sessionId": session["sessionId"]});

    let (status, _, body) = send(
        &app.router,
        json_request("POST", "/auth/emergency-cleanup", cleanup.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["redisCleared"], true);
    assert_eq!(body["sessionsCleared"], 1);
    assert_eq!(body["tokensCleared"], 1);

    let (status, _, body) = send(
        &app.router,
        json_request("POST", "/auth/emergency-cleanup", cleanup),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessionsCleared"], 0);
    assert_eq!(body["tokensCleared"], 0);

    let records = app.audit.recent(10).await;
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.action == "full"));
}

#[tokio::test]
async fn test_client_cleanup_only_audits() {
    let app = create_test_app(5).await;
    let session = login(&app, "ana@portal.test").await;

    let (status, _, body) = send(
        &app.router,
        json_request(
            "POST",
            "/auth/emergency-cleanup",
            json!({"action": "client_cleanup", "sessionId": session["sessionId"]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["redisCleared"], false);
    assert_eq!(body["sessionsCleared"], 0);
    assert_eq!(app.store.stats().await.unwrap().sessions, 1);
    assert_eq!(app.audit.recent(10).await.len(), 1);
}

#[tokio::test]
async fn test_user_cleanup_requires_authorization() {
    let app = create_test_app(5).await;
    let ana = login(&app, "ana@portal.test").await;
    let root = login(&app, "root@portal.test").await;
    let target = json!({"action": "server", "userId": 1});

    let (status, _, body) = send(
        &app.router,
        json_request("POST", "/auth/emergency-cleanup", target.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");

    // Logged in as someone else, without the admin role
    let other = json!({"action": "server", "userId": 2});
    let mut request = json_request("POST", "/auth/emergency-cleanup", other);
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {}", ana["token"].as_str().unwrap()).parse().unwrap(),
    );
    let (status, _, _) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let mut request = json_request("POST", "/auth/emergency-cleanup", target);
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {}", root["token"].as_str().unwrap()).parse().unwrap(),
    );
    let (status, _, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessionsCleared"], 1);
    assert_eq!(app.store.stats().await.unwrap().sessions, 1);
}

#[tokio::test]
async fn test_cleanup_without_target_is_noop() {
    let app = create_test_app(5).await;
    login(&app, "ana@portal.test").await;

    let (status, _, body) = send(
        &app.router,
        json_request("POST", "/auth/emergency-cleanup", json!({"action": "full"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["redisCleared"], false);
    assert_eq!(body["sessionsCleared"], 0);
    assert_eq!(app.store.stats().await.unwrap().sessions, 1);
}

// ============================================================================
// Protected Route Tests
// ============================================================================

#[tokio::test]
async fn test_protected_routes_require_bearer() {
    let app = create_test_app(5).await;

    for uri in ["/auth/me", "/auth/sessions", "/api/auth/me"] {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let (status, _, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
        assert_eq!(body["success"], false);
    }
}

#[tokio::test]
async fn test_sessions_and_logout_all() {
    let app = create_test_app(5).await;
    let first = login(&app, "ana@portal.test").await;
    let second = login(&app, "ana@portal.test").await;
    login(&app, "root@portal.test").await;
    let token = second["token"].as_str().unwrap();

    let (status, _, body) = send(&app.router, bearer_request("GET", "/auth/me", token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["email"], "ana@portal.test");
    assert_eq!(body["session"]["sessionId"], second["sessionId"]);

    let (status, _, body) = send(&app.router, bearer_request("GET", "/auth/sessions", token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["currentSessionId"], second["sessionId"]);
    let sessions = body["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 2);
    assert!(sessions.iter().any(|s| s["sessionId"] == first["sessionId"]));
    assert!(sessions.iter().all(|s| s.get("refreshTokenDigest").is_none()));

    let (status, _, body) = send(&app.router, bearer_request("POST", "/auth/logout-all", token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessionsCleared"], 2);
    assert_eq!(app.store.stats().await.unwrap().sessions, 1);
}
