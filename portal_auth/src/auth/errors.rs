//! Authentication error types.

use thiserror::Error;

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// Email or password absent from the credential
    #[error("Email and password are required")]
    MissingCredentials,

    /// Unknown account, wrong password or inactive account
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// Malformed token, bad signature or wrong token type
    #[error("Invalid token")]
    InvalidToken,

    /// Token signature is fine but `exp` has passed
    #[error("Token expired")]
    ExpiredToken,

    /// Refresh token was already rotated or lost a concurrent rotation
    #[error("Refresh token already used")]
    RefreshConflict,

    /// Refresh token is unknown, tampered or its session has expired
    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    /// Session store or directory did not answer in time
    #[error("Backend unreachable: {0}")]
    BackendUnreachable(String),

    /// Some surfaces were purged, others could not be reached
    #[error("Cleanup partially failed: {0}")]
    CleanupPartialFailure(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Password hashing failed
    #[error("Password hashing failed")]
    HashingFailed,

    /// JWT encoding error
    #[error("JWT error: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),

    /// Session not found
    #[error("Session not found")]
    SessionNotFound,

    /// Rate limited
    #[error("Too many attempts, please try again later")]
    RateLimited,

    /// Caller may not act on the requested target
    #[error("Not allowed to act on this session")]
    Forbidden,
}

impl AuthError {
    /// Stable machine-readable code used in the `{success, message, code}` envelope.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingCredentials => "MISSING_CREDENTIALS",
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::InvalidToken => "INVALID_TOKEN",
            AuthError::ExpiredToken => "EXPIRED_TOKEN",
            AuthError::RefreshConflict => "REFRESH_CONFLICT",
            AuthError::InvalidRefreshToken => "INVALID_REFRESH_TOKEN",
            AuthError::BackendUnreachable(_) => "BACKEND_UNREACHABLE",
            AuthError::CleanupPartialFailure(_) => "CLEANUP_PARTIAL_FAILURE",
            AuthError::Database(_) | AuthError::HashingFailed | AuthError::JwtError(_) => {
                "INTERNAL_ERROR"
            }
            AuthError::SessionNotFound => "SESSION_NOT_FOUND",
            AuthError::RateLimited => "TOO_MANY_ATTEMPTS",
            AuthError::Forbidden => "FORBIDDEN",
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::BackendUnreachable(_) | AuthError::Database(_))
    }

    /// Get a client-safe error message that doesn't leak sensitive information
    ///
    /// Database and JWT errors are sanitized to prevent information disclosure
    /// about the internal system structure.
    pub fn client_message(&self) -> String {
        match self {
            AuthError::Database(_) => "Internal server error".to_string(),
            AuthError::JwtError(_) => "Authentication failed".to_string(),
            AuthError::BackendUnreachable(_) => "Service temporarily unavailable".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Result type for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_match_wire_contract() {
        assert_eq!(AuthError::MissingCredentials.code(), "MISSING_CREDENTIALS");
        assert_eq!(AuthError::InvalidCredentials.code(), "INVALID_CREDENTIALS");
        assert_eq!(AuthError::InvalidRefreshToken.code(), "INVALID_REFRESH_TOKEN");
        assert_eq!(AuthError::InvalidToken.code(), "INVALID_TOKEN");
    }

    #[test]
    fn test_client_message_hides_backend_details() {
        let err = AuthError::BackendUnreachable("pg01.internal:5432 timed out".to_string());
        assert!(!err.client_message().contains("pg01"));
        assert!(err.is_transient());
        assert!(!AuthError::RefreshConflict.is_transient());
    }
}
