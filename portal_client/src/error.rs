//! Client error types.

use thiserror::Error;

/// Errors surfaced by the client runtime.
///
/// `Clone` so that one in-flight refresh can hand the same outcome to every
/// caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Email and password are required")]
    MissingCredentials,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Refresh token already used")]
    RefreshConflict,

    /// Network failure, timeout or a 5xx answer
    #[error("Backend unreachable: {0}")]
    BackendUnreachable(String),

    /// No usable session; the user has to log in again
    #[error("Login required")]
    ReloginRequired,

    /// Any other error envelope returned by the server
    #[error("Request rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Local purge finished but the server could not be told about it
    #[error("Cleanup partially failed: {0}")]
    CleanupPartialFailure(String),
}

impl ClientError {
    /// Map a `{success: false, code, message}` envelope to an error.
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        match code {
            "INVALID_CREDENTIALS" => ClientError::InvalidCredentials,
            "MISSING_CREDENTIALS" => ClientError::MissingCredentials,
            "INVALID_REFRESH_TOKEN" => ClientError::InvalidRefreshToken,
            "REFRESH_CONFLICT" => ClientError::RefreshConflict,
            "BACKEND_UNREACHABLE" => ClientError::BackendUnreachable(message.into()),
            _ => ClientError::Rejected {
                code: code.to_string(),
                message: message.into(),
            },
        }
    }

    /// Only transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::BackendUnreachable(_))
    }

    /// The refresh token is gone for good; drop the session.
    pub fn requires_relogin(&self) -> bool {
        matches!(
            self,
            ClientError::InvalidRefreshToken
                | ClientError::RefreshConflict
                | ClientError::ReloginRequired
        )
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Storage(err.to_string())
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
