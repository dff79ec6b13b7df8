//! Authentication middleware for protected endpoints.
//!
//! Validates the `Authorization: Bearer <token>` header and injects an
//! [`AuthContext`] into request extensions for downstream handlers.
//!
//! ```rust,no_run
//! use axum::extract::Extension;
//! use portal_server::api::middleware::AuthContext;
//!
//! async fn protected_handler(Extension(ctx): Extension<AuthContext>) -> String {
//!     format!("Authenticated as user {} ({})", ctx.user_id, ctx.role)
//! }
//! # let _ = protected_handler;
//! ```

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use portal_auth::auth::{AccessTokenClaims, UserId};
use uuid::Uuid;

use super::{AppState, error::ApiError};

/// Authorization decision forwarded to collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: UserId,
    pub session_id: Uuid,
    pub role: String,
    pub permissions: Vec<String>,
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

impl From<AccessTokenClaims> for AuthContext {
    fn from(claims: AccessTokenClaims) -> Self {
        Self {
            user_id: claims.user_id,
            session_id: claims.session_id,
            role: claims.role,
            permissions: claims.permissions,
        }
    }
}

/// Token from an `Authorization: Bearer` header, if any.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Validates the Bearer token and requires its session to still be live.
///
/// - **Missing header**: `401 UNAUTHORIZED`
/// - **Invalid/expired token**: `401 INVALID_TOKEN` / `401 EXPIRED_TOKEN`
/// - **Session logged out or purged**: `401 UNAUTHORIZED`
/// - **Store unreachable**: `503 BACKEND_UNREACHABLE`
///
/// Successful requests bump the session's `last_activity_at`.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers()).ok_or(ApiError::Unauthorized)?;
    let claims = state.auth_manager.validate(token)?;

    if !state.auth_manager.touch(claims.session_id).await? {
        tracing::debug!(session_id = %claims.session_id, "Bearer token for a closed session");
        return Err(ApiError::Unauthorized);
    }

    request.extensions_mut().insert(AuthContext::from(claims));
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer eyJ.abc.def"));
        assert_eq!(bearer_token(&headers), Some("eyJ.abc.def"));
    }
}
