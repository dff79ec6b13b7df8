//! Authentication API handlers.
//!
//! - Login with email/password and optional "remember me"
//! - Refresh token rotation (body or `refresh_token` cookie)
//! - Stateless access-token validation
//! - Best-effort logout and emergency cleanup
//! - Session listing and logout-all for the authenticated user
//!
//! All failures use the `{success: false, message, code}` envelope.
//!
//! # Examples
//!
//! Login:
//! ```bash
//! curl -X POST http://localhost:8080/auth/login \
//!   -H "Content-Type: application/json" \
//!   -d '{"email": "ana@portal.test", "password": "Secret123", "rememberMe": true}'
//! ```
//!
//! Refresh:
//! ```bash
//! curl -X POST http://localhost:8080/auth/refresh \
//!   -H "Content-Type: application/json" \
//!   -d '{"refreshToken": "3f9c..."}'
//! ```

use axum::{
    Json,
    body::Bytes,
    extract::{Extension, State},
    http::HeaderMap,
    response::{AppendHeaders, IntoResponse, Response},
};
use portal_auth::{
    AuthError, CleanupScope,
    auth::{AccessTokenClaims, Credential, LogoutTarget, RefreshResult, UserId, UserProfile},
    session::{PurgeFilter, SessionInfo},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use super::{
    AppState,
    cookies::{self, REFRESH_COOKIE_NAME, SetCookies},
    error::ApiError,
    middleware::{AuthContext, bearer_token},
    request_id::RequestId,
};
use crate::{
    logging::{SecurityEvent, log_security_event},
    metrics,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
    pub refresh_token: String,
    pub session_id: Uuid,
    pub user: UserProfile,
    pub expires_in: i64,
    pub refresh_expires_in: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshPayload {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub success: bool,
    #[serde(flatten)]
    pub result: RefreshResult,
}

/// User view returned by `/auth/validate`. Profile fields come from the
/// session when it is still in the store.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedUser {
    pub id: UserId,
    pub session_id: Uuid,
    pub email: Option<String>,
    pub name: Option<String>,
    pub role: String,
    pub permissions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub user: ValidatedUser,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutPayload {
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutResponse {
    pub success: bool,
    pub sessions_cleared: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupPayload {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub user_id: Option<UserId>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    pub success: bool,
    /// Whether the shared server store was purged for this request
    #[serde(rename = "redisCleared")]
    pub store_cleared: bool,
    pub sessions_cleared: u64,
    pub tokens_cleared: u64,
    pub cache_cleared: u64,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub success: bool,
    pub user: UserProfile,
    pub session: SessionInfo,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsResponse {
    pub success: bool,
    pub current_session_id: Uuid,
    pub sessions: Vec<SessionInfo>,
}

/// First `X-Forwarded-For` hop, for security event logging.
fn client_ip(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
}

/// Parse an optional JSON body. An empty body yields the default payload.
fn optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> T {
    if body.iter().all(u8::is_ascii_whitespace) {
        return T::default();
    }
    serde_json::from_slice(body).unwrap_or_else(|e| {
        tracing::debug!("Ignoring unparseable request body: {}", e);
        T::default()
    })
}

/// Login with email and password.
///
/// # Request Body
///
/// ```json
/// { "email": "ana@portal.test", "password": "Secret123", "rememberMe": false }
/// ```
///
/// # Response
///
/// `200 OK` with `{success, token, refreshToken, sessionId, user, expiresIn,
/// refreshExpiresIn}`; auth cookies are set when enabled.
///
/// # Errors
///
/// - `400 MISSING_CREDENTIALS`: email or password absent
/// - `401 INVALID_CREDENTIALS`: unknown email, wrong password or inactive account
/// - `429 TOO_MANY_ATTEMPTS`: too many failures for this email
/// - `503 BACKEND_UNREACHABLE`: directory or store did not answer
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(credential): Json<Credential>,
) -> Result<(AppendHeaders<SetCookies>, Json<LoginResponse>), ApiError> {
    let email = credential.email.trim().to_string();

    if !email.is_empty() && !state.login_limiter.check(&email) {
        metrics::rate_limit_hit("login");
        metrics::login_attempt("rate_limited");
        log_security_event(
            SecurityEvent::LoginRateLimited,
            None,
            client_ip(&headers),
            &format!("Login attempts exhausted for {email}"),
        );
        return Err(AuthError::RateLimited.into());
    }

    let result = match state.auth_manager.login(credential).await {
        Ok(result) => result,
        Err(AuthError::InvalidCredentials) => {
            state.login_limiter.record_failure(&email);
            metrics::login_attempt("rejected");
            log_security_event(
                SecurityEvent::FailedLogin,
                None,
                client_ip(&headers),
                &format!("Invalid credentials for {email}"),
            );
            return Err(AuthError::InvalidCredentials.into());
        }
        Err(e) => {
            metrics::login_attempt("rejected");
            return Err(e.into());
        }
    };

    state.login_limiter.record_success(&email);
    metrics::login_attempt("success");
    tracing::info!(
        user_id = result.session.user_id,
        session_id = %result.session.session_id,
        "Login succeeded"
    );

    let set_cookies = cookies::session_cookies(
        &state.cookies,
        &result.access_token,
        result.expires_in,
        &result.refresh_token,
        result.refresh_expires_in,
    );

    Ok((
        AppendHeaders(set_cookies),
        Json(LoginResponse {
            success: true,
            user: UserProfile::from(&result.session),
            session_id: result.session.session_id,
            token: result.access_token,
            refresh_token: result.refresh_token,
            expires_in: result.expires_in,
            refresh_expires_in: result.refresh_expires_in,
        }),
    ))
}

/// Exchange a refresh token for a new pair.
///
/// The token is read from `{"refreshToken": ...}` or, when the body carries
/// none, from the `refresh_token` cookie. Every success rotates the token.
///
/// # Errors
///
/// - `401 INVALID_REFRESH_TOKEN`: unknown, tampered or expired
/// - `401 REFRESH_CONFLICT`: already rotated (replay or lost race)
///
/// Both clear the auth cookies; the client must log in again.
pub async fn refresh(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let payload: RefreshPayload = optional_json(&body);
    let token = payload
        .refresh_token
        .filter(|t| !t.trim().is_empty())
        .or_else(|| cookies::get_cookie(&headers, REFRESH_COOKIE_NAME).map(str::to_string))
        .unwrap_or_default();

    match state.auth_manager.refresh(&token).await {
        Ok(result) => {
            metrics::refresh("success");
            let set_cookies = cookies::session_cookies(
                &state.cookies,
                &result.access_token,
                result.expires_in,
                &result.refresh_token,
                result.refresh_expires_in,
            );
            (
                AppendHeaders(set_cookies),
                Json(RefreshResponse {
                    success: true,
                    result,
                }),
            )
                .into_response()
        }
        Err(e @ (AuthError::InvalidRefreshToken | AuthError::RefreshConflict)) => {
            metrics::refresh(e.code());
            if matches!(e, AuthError::RefreshConflict) {
                log_security_event(
                    SecurityEvent::RefreshReplay,
                    None,
                    client_ip(&headers),
                    "Rotated refresh token presented again",
                );
            }
            (
                AppendHeaders(cookies::cleared_cookies(&state.cookies)),
                ApiError::from(e),
            )
                .into_response()
        }
        Err(e) => {
            metrics::refresh(e.code());
            ApiError::from(e).into_response()
        }
    }
}

/// Validate a Bearer access token.
///
/// Validity is decided by signature and `exp` alone; the session record is
/// only consulted to fill in profile fields.
pub async fn validate(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ValidateResponse>, ApiError> {
    let token = bearer_token(&headers).ok_or(AuthError::InvalidToken)?;
    let claims = state.auth_manager.validate(token)?;
    let user = enrich(&state, claims).await;

    Ok(Json(ValidateResponse { valid: true, user }))
}

async fn enrich(state: &AppState, claims: AccessTokenClaims) -> ValidatedUser {
    let session = match state.auth_manager.session(claims.session_id).await {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!("Session lookup during validate failed: {}", e);
            None
        }
    };

    ValidatedUser {
        id: claims.user_id,
        session_id: claims.session_id,
        email: session.as_ref().map(|s| s.email.clone()),
        name: session.as_ref().map(|s| s.name.clone()),
        role: claims.role,
        permissions: claims.permissions,
    }
}

/// Best-effort logout. Always answers `200` and clears the auth cookies.
///
/// The session is located, in order, by `sessionId`, `refreshToken`, the
/// `refresh_token` cookie and the Bearer token.
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (AppendHeaders<SetCookies>, Json<LogoutResponse>) {
    let payload: LogoutPayload = optional_json(&body);

    let mut target = LogoutTarget {
        session_id: payload.session_id,
        refresh_token: payload
            .refresh_token
            .filter(|t| !t.trim().is_empty())
            .or_else(|| cookies::get_cookie(&headers, REFRESH_COOKIE_NAME).map(str::to_string)),
    };
    if target.is_empty() {
        target.session_id = bearer_token(&headers)
            .and_then(|t| state.auth_manager.validate(t).ok())
            .map(|claims| claims.session_id);
    }

    let sessions_cleared = match state.auth_manager.logout(&target).await {
        Ok(counts) => counts.sessions_cleared,
        Err(e) => {
            tracing::warn!("Logout could not reach the session store: {}", e);
            0
        }
    };

    (
        AppendHeaders(cookies::cleared_cookies(&state.cookies)),
        Json(LogoutResponse {
            success: true,
            sessions_cleared,
        }),
    )
}

/// Emergency cleanup of server-side auth state.
///
/// # Request Body
///
/// ```json
/// { "action": "full", "sessionId": "9b2f...", "userId": 42 }
/// ```
///
/// `action` is one of `client_cleanup`, `server` or `full`. Targeting a
/// `userId` needs a Bearer token for that user or the `admin` role. A
/// request without a target succeeds with zero counts.
///
/// # Errors
///
/// - `400 INVALID_ACTION`: unknown action
/// - `403 FORBIDDEN`: `userId` target without matching authorization
pub async fn emergency_cleanup(
    State(state): State<AppState>,
    request_id: RequestId,
    headers: HeaderMap,
    Json(payload): Json<CleanupPayload>,
) -> Result<(AppendHeaders<SetCookies>, Json<CleanupResponse>), ApiError> {
    let scope = CleanupScope::from_action(&payload.action)
        .ok_or_else(|| ApiError::InvalidAction(payload.action.clone()))?;

    let caller = bearer_token(&headers).and_then(|t| state.auth_manager.validate(t).ok());

    if let Some(user_id) = payload.user_id {
        let allowed = caller
            .as_ref()
            .is_some_and(|c| c.user_id == user_id || c.role == "admin");
        if !allowed {
            log_security_event(
                SecurityEvent::CleanupForbidden,
                caller.as_ref().map(|c| c.user_id),
                client_ip(&headers),
                &format!("Cleanup of user {user_id} refused"),
            );
            return Err(AuthError::Forbidden.into());
        }
    }

    let actor = match (&caller, payload.session_id) {
        (Some(claims), _) => format!("user:{}", claims.user_id),
        (None, Some(session_id)) => format!("session:{session_id}"),
        (None, None) => "anonymous".to_string(),
    };

    let filter = PurgeFilter::Matching {
        session_id: payload.session_id,
        user_id: payload.user_id,
    };
    let counts = state.cleanup.run(scope, &filter, &actor).await?;
    metrics::cleanup(scope.as_str());

    if !counts.is_zero() {
        log_security_event(
            SecurityEvent::EmergencyCleanup,
            payload.user_id,
            client_ip(&headers),
            &format!(
                "{scope} cleanup by {actor} cleared {} session(s) [{}]",
                counts.sessions_cleared,
                request_id.as_str()
            ),
        );
    }

    Ok((
        AppendHeaders(cookies::cleared_cookies(&state.cookies)),
        Json(CleanupResponse {
            success: true,
            store_cleared: scope.includes_server() && !filter.is_empty(),
            sessions_cleared: counts.sessions_cleared,
            tokens_cleared: counts.tokens_cleared,
            cache_cleared: counts.cache_cleared,
        }),
    ))
}

/// Current user and session. Requires the auth middleware.
pub async fn me(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<MeResponse>, ApiError> {
    let session = state
        .auth_manager
        .session(ctx.session_id)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    Ok(Json(MeResponse {
        success: true,
        user: UserProfile::from(&session),
        session: session.info(),
    }))
}

/// Live sessions of the authenticated user.
pub async fn sessions(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<SessionsResponse>, ApiError> {
    let sessions = state.auth_manager.list_sessions(ctx.user_id).await?;
    Ok(Json(SessionsResponse {
        success: true,
        current_session_id: ctx.session_id,
        sessions,
    }))
}

/// Invalidate every session of the authenticated user.
pub async fn logout_all(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<(AppendHeaders<SetCookies>, Json<LogoutResponse>), ApiError> {
    let counts = state.auth_manager.logout_all(ctx.user_id).await?;
    tracing::info!(
        user_id = ctx.user_id,
        sessions = counts.sessions_cleared,
        "Logged out everywhere"
    );

    Ok((
        AppendHeaders(cookies::cleared_cookies(&state.cookies)),
        Json(LogoutResponse {
            success: true,
            sessions_cleared: counts.sessions_cleared,
        }),
    ))
}
