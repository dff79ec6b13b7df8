//! # Portal Auth
//!
//! Session and token lifecycle core for the educational portal.
//!
//! The crate owns everything that must agree between the HTTP surface and
//! the client runtime:
//!
//! - **Token Issuer** ([`auth::AuthManager`]): verifies credentials, mints
//!   access/refresh pairs and validates access tokens
//! - **Session Store** ([`session::SessionStore`]): the shared server-side
//!   source of truth, with an in-memory and a PostgreSQL backend
//! - **Emergency Cleanup** ([`cleanup`]): the shared cleanup scope, the
//!   server half of the purge protocol and store anomaly detection
//!
//! ## Example
//!
//! ```
//! use portal_auth::auth::{AuthManager, Credential, TokenConfig};
//! use portal_auth::clock::SystemClock;
//! use portal_auth::db::{MemoryUserDirectory, UserRecord};
//! use portal_auth::session::MemorySessionStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let clock = Arc::new(SystemClock);
//!     let config = TokenConfig::new("a-very-long-signing-secret-for-docs-0001", "pepper-for-docs!");
//!     let directory = Arc::new(MemoryUserDirectory::new());
//!     let store = Arc::new(MemorySessionStore::new(clock.clone()));
//!     let auth = AuthManager::new(directory.clone(), store, clock, config);
//!
//!     let hash = auth.hash_password("Secret123")?;
//!     directory
//!         .insert(UserRecord::new(1, "ana@example.com", "Ana", "student", hash))
//!         .await;
//!
//!     let login = auth
//!         .login(Credential::new("ana@example.com", "Secret123"))
//!         .await?;
//!     let claims = auth.validate(&login.access_token)?;
//!     assert_eq!(claims.user_id, 1);
//!     Ok(())
//! }
//! ```

/// Credential verification, token minting and validation.
pub mod auth;

/// Cleanup scope, server-side purge, audit log and anomaly detection.
pub mod cleanup;

/// Injectable time source.
pub mod clock;

/// PostgreSQL pool, schema, user directory and store timeouts.
pub mod db;

/// Session records and the `SessionStore` backends.
pub mod session;

pub use auth::{AuthError, AuthManager, AuthResult};
pub use cleanup::CleanupScope;
pub use session::{Session, SessionStore};
