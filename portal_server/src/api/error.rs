//! JSON error envelope for every API handler.
//!
//! ```json
//! { "success": false, "message": "Invalid refresh token", "code": "INVALID_REFRESH_TOKEN" }
//! ```

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use portal_auth::AuthError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    pub code: &'static str,
}

/// Error returned by API handlers.
#[derive(Debug)]
pub enum ApiError {
    Auth(AuthError),
    /// Emergency-cleanup request named an action outside the known set
    InvalidAction(String),
    /// Protected route hit without a usable Bearer token
    Unauthorized,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Auth(err) => match err {
                AuthError::MissingCredentials => StatusCode::BAD_REQUEST,
                AuthError::InvalidCredentials
                | AuthError::InvalidToken
                | AuthError::ExpiredToken
                | AuthError::InvalidRefreshToken
                | AuthError::RefreshConflict => StatusCode::UNAUTHORIZED,
                AuthError::Forbidden => StatusCode::FORBIDDEN,
                AuthError::SessionNotFound => StatusCode::NOT_FOUND,
                AuthError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
                AuthError::BackendUnreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
                AuthError::CleanupPartialFailure(_)
                | AuthError::Database(_)
                | AuthError::HashingFailed
                | AuthError::JwtError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::InvalidAction(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Auth(err) => err.code(),
            ApiError::InvalidAction(_) => "INVALID_ACTION",
            ApiError::Unauthorized => "UNAUTHORIZED",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Auth(err) => err.client_message(),
            ApiError::InvalidAction(action) => format!("Unknown cleanup action '{action}'"),
            ApiError::Unauthorized => "Authentication required".to_string(),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Auth(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "Request failed: {:?}", self);
        }
        let body = ErrorResponse {
            success: false,
            message: self.message(),
            code: self.code(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(AuthError::MissingCredentials).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(AuthError::RefreshConflict).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(AuthError::RateLimited).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::from(AuthError::BackendUnreachable("timeout".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::InvalidAction("nuke".into()).code(),
            "INVALID_ACTION"
        );
    }

    #[test]
    fn test_backend_detail_not_leaked() {
        let err = ApiError::from(AuthError::BackendUnreachable("10.0.0.3:5432 refused".into()));
        assert!(!err.message().contains("10.0.0.3"));
    }
}
