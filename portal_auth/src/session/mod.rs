//! Shared server-side session storage.
//!
//! Handlers and the token issuer hold an injected `Arc<dyn SessionStore>`;
//! there is no process-wide session map.
//!
//! [`SessionStore::rotate`] is the only operation that changes which refresh
//! token a session accepts. Backends linearize it so that of two concurrent
//! rotations of the same value exactly one succeeds and the other gets
//! [`AuthError::RefreshConflict`](crate::AuthError::RefreshConflict).

pub mod memory;
pub mod models;
pub mod postgres;

pub use memory::MemorySessionStore;
pub use models::{
    ProfileUpdate, PurgeCounts, PurgeFilter, RECENT_ACTIVITY_WINDOW, RefreshLookup, Session,
    SessionInfo, StoreStats, digest_refresh_token,
};
pub use postgres::PgSessionStore;

use crate::auth::{AuthResult, models::UserId};
use async_trait::async_trait;
use chrono::Duration;
use uuid::Uuid;

/// Session store operations
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a session. Re-creating an existing `session_id` is a no-op.
    async fn create(&self, session: Session) -> AuthResult<()>;

    /// Fetch a live session. Expired records are reported as `None`.
    async fn get(&self, session_id: Uuid) -> AuthResult<Option<Session>>;

    /// Resolve a presented refresh token without mutating anything.
    async fn resolve_refresh_token(&self, refresh_token: &str) -> AuthResult<RefreshLookup>;

    /// Atomically replace `old_refresh_token` with `new_refresh_token` and
    /// extend the refresh horizon to `now + new_ttl`.
    ///
    /// # Errors
    ///
    /// * `AuthError::RefreshConflict` - `old_refresh_token` was already rotated
    /// * `AuthError::InvalidRefreshToken` - unknown token or expired session
    async fn rotate(
        &self,
        old_refresh_token: &str,
        new_refresh_token: &str,
        new_ttl: Duration,
    ) -> AuthResult<Session>;

    /// Bump `last_activity_at`. Returns false when the session is gone.
    async fn touch(&self, session_id: Uuid) -> AuthResult<bool>;

    /// Apply a profile change to every session of `user_id`.
    async fn update_profile(&self, user_id: UserId, update: &ProfileUpdate) -> AuthResult<u64>;

    /// Live sessions of one user, oldest first.
    async fn list_for_user(&self, user_id: UserId) -> AuthResult<Vec<Session>>;

    /// Remove a session and every refresh-token pointer to it.
    async fn delete(&self, session_id: Uuid) -> AuthResult<PurgeCounts> {
        self.purge(&PurgeFilter::session(session_id)).await
    }

    /// Remove every session matched by `filter`.
    async fn purge(&self, filter: &PurgeFilter) -> AuthResult<PurgeCounts>;

    /// Drop sessions whose refresh horizon has passed.
    async fn sweep_expired(&self) -> AuthResult<u64>;

    async fn stats(&self) -> AuthResult<StoreStats>;

    /// Whether the backing store answers at all.
    async fn health_check(&self) -> bool;
}
