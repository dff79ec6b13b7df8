//! HTTP API for the portal auth service.
//!
//! # Modules
//!
//! - [`auth`]: login, refresh, validate, logout, emergency cleanup and session views
//! - [`middleware`]: Bearer authentication for protected endpoints
//! - [`cookies`]: auth cookie parsing and `Set-Cookie` construction
//! - [`rate_limiter`]: per-email login attempt limiting
//! - [`request_id`]: `x-request-id` propagation and access logging
//! - [`error`]: the `{success, message, code}` error envelope
//!
//! # Endpoints Overview
//!
//! Every auth route is mounted under both `/auth` and `/api/auth`.
//!
//! ## Public
//! - `POST /auth/login` - Login with credentials
//! - `POST /auth/refresh` - Rotate a refresh token
//! - `GET  /auth/validate` - Validate a Bearer access token
//! - `POST /auth/logout` - Best-effort session invalidation
//! - `POST /auth/emergency-cleanup` - Purge auth state
//!
//! ## Protected (Bearer)
//! - `GET  /auth/me` - Current user and session
//! - `GET  /auth/sessions` - Live sessions of the current user
//! - `POST /auth/logout-all` - Invalidate every session of the current user
//!
//! ## Health Check
//! - `GET /health` - Session store reachability
//!
//! # CORS
//!
//! CORS is configured permissively for development. In production, configure
//! appropriate origins, methods, and headers.

pub mod auth;
pub mod cookies;
pub mod error;
pub mod middleware;
pub mod rate_limiter;
pub mod request_id;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use portal_auth::{AuthManager, cleanup::ServerCleanup};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::config::CookieConfig;
use rate_limiter::LoginRateLimiter;

/// Application state shared across all HTTP handlers.
///
/// Cloned per request; every field is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub auth_manager: Arc<AuthManager>,
    pub cleanup: ServerCleanup,
    pub login_limiter: Arc<LoginRateLimiter>,
    pub cookies: Arc<CookieConfig>,
}

/// Create the complete API router with all endpoints and middleware.
///
/// # Example
///
/// ```rust,no_run
/// # use portal_server::api::{create_router, AppState};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// # let state: AppState = unimplemented!();
/// let app = create_router(state);
/// let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
/// axum::serve(listener, app).await?;
/// # Ok(())
/// # }
/// ```
pub fn create_router(state: AppState) -> Router {
    let auth_routes = create_auth_router(state.clone());

    Router::new()
        .route("/health", get(health_check))
        .nest("/auth", auth_routes.clone())
        .nest("/api/auth", auth_routes)
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn create_auth_router(state: AppState) -> Router<AppState> {
    // Public routes (no authentication middleware)
    let public_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/validate", get(auth::validate))
        .route("/logout", post(auth::logout))
        .route("/emergency-cleanup", post(auth::emergency_cleanup));

    // Protected routes (require authentication middleware)
    let protected_routes = Router::new()
        .route("/me", get(auth::me))
        .route("/sessions", get(auth::sessions))
        .route("/logout-all", post(auth::logout_all))
        .layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth_middleware,
        ));

    Router::new().merge(public_routes).merge(protected_routes)
}

/// Health check endpoint for monitoring and load balancers.
///
/// Returns `200 OK` when the session store answers, `503 Service Unavailable`
/// otherwise.
///
/// ```bash
/// curl http://localhost:8080/health
/// # {"status":"healthy","store":true,"version":"1.0.0","timestamp":"2026-10-14T10:30:00Z"}
/// ```
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let store_healthy = state.auth_manager.store().health_check().await;

    let status_code = if store_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = json!({
        "status": if store_healthy { "healthy" } else { "unhealthy" },
        "store": store_healthy,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (status_code, Json(response))
}
