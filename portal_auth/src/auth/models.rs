//! Authentication data models.

use crate::session::Session;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User ID type
pub type UserId = i64;

/// Marker stored in the `typ` claim of every access token.
pub const ACCESS_TOKEN_TYPE: &str = "access";

/// Login credential. Transient, never persisted.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

impl Credential {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            remember_me: false,
        }
    }

    pub fn remember_me(mut self, remember_me: bool) -> Self {
        self.remember_me = remember_me;
        self
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("remember_me", &self.remember_me)
            .finish()
    }
}

/// JWT claims for access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenClaims {
    pub user_id: UserId,
    pub session_id: Uuid,
    pub role: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub typ: String,
    pub iat: i64,
    pub exp: i64,
}

/// Public view of the authenticated user, as returned by login and validate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub role: String,
    pub permissions: Vec<String>,
}

impl From<&Session> for UserProfile {
    fn from(session: &Session) -> Self {
        Self {
            id: session.user_id,
            email: session.email.clone(),
            name: session.name.clone(),
            role: session.role.clone(),
            permissions: session.permissions.clone(),
        }
    }
}

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginResult {
    pub access_token: String,
    pub refresh_token: String,
    pub session: Session,
    /// Seconds until the access token expires
    pub expires_in: i64,
    /// Seconds until the refresh horizon ends
    pub refresh_expires_in: i64,
}

/// Result of a successful rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResult {
    pub access_token: String,
    pub refresh_token: String,
    pub session_id: Uuid,
    pub expires_in: i64,
    pub refresh_expires_in: i64,
}

/// What a logout call should invalidate.
#[derive(Debug, Clone, Default)]
pub struct LogoutTarget {
    pub session_id: Option<Uuid>,
    pub refresh_token: Option<String>,
}

impl LogoutTarget {
    pub fn session(session_id: Uuid) -> Self {
        Self {
            session_id: Some(session_id),
            refresh_token: None,
        }
    }

    pub fn refresh_token(token: impl Into<String>) -> Self {
        Self {
            session_id: None,
            refresh_token: Some(token.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.session_id.is_none() && self.refresh_token.is_none()
    }
}
