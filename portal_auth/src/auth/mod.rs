//! Token issuer for the portal.
//!
//! - Argon2id password verification with a server-side pepper
//! - HS256 access tokens carrying `{userId, sessionId, role, permissions, iat, exp}`
//! - Opaque single-use refresh tokens, rotated on every refresh
//! - Separate lifetimes for "remember me" sessions

pub mod config;
pub mod errors;
pub mod manager;
pub mod models;

pub use config::TokenConfig;
pub use errors::{AuthError, AuthResult};
pub use manager::AuthManager;
pub use models::{
    AccessTokenClaims, Credential, LoginResult, LogoutTarget, RefreshResult, UserId, UserProfile,
};
