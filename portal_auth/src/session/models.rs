//! Session records and the value types exchanged with a `SessionStore`.

use crate::auth::models::UserId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// Server-side session record.
///
/// Refresh tokens are never held in clear text: `refresh_token_digest` is
/// the SHA-256 digest of the one value that may currently be redeemed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: Uuid,
    pub user_id: UserId,
    pub email: String,
    pub name: String,
    pub role: String,
    pub permissions: Vec<String>,
    pub refresh_token_digest: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    /// End of the refresh horizon; the session is gone after this instant
    pub refresh_expires_at: DateTime<Utc>,
    pub remember_me: bool,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.refresh_expires_at <= now
    }

    /// Constant-time check of a presented refresh token against the current digest.
    pub fn matches_refresh_token(&self, token: &str) -> bool {
        let presented = digest_refresh_token(token);
        presented
            .as_bytes()
            .ct_eq(self.refresh_token_digest.as_bytes())
            .into()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id,
            user_id: self.user_id,
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
            refresh_expires_at: self.refresh_expires_at,
            remember_me: self.remember_me,
        }
    }
}

/// Session metadata safe to hand to the owning user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub remember_me: bool,
}

/// Rename or permission change pushed from the user directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub role: Option<String>,
    pub permissions: Option<Vec<String>>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.role.is_none() && self.permissions.is_none()
    }

    pub(crate) fn apply(&self, session: &mut Session) {
        if let Some(name) = &self.name {
            session.name.clone_from(name);
        }
        if let Some(role) = &self.role {
            session.role.clone_from(role);
        }
        if let Some(permissions) = &self.permissions {
            session.permissions.clone_from(permissions);
        }
    }
}

/// What a presented refresh token resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshLookup {
    /// The token is the session's current refresh token
    Current(Session),
    /// The token belonged to this session but was rotated away
    Retired { session_id: Uuid },
    /// Never issued, tampered, or its session is gone
    Unknown,
}

/// Selector for a purge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurgeFilter {
    /// Sessions whose id equals `session_id` or whose owner equals `user_id`
    Matching {
        session_id: Option<Uuid>,
        user_id: Option<UserId>,
    },
    /// Every session in the store
    All,
}

impl PurgeFilter {
    pub fn session(session_id: Uuid) -> Self {
        PurgeFilter::Matching {
            session_id: Some(session_id),
            user_id: None,
        }
    }

    pub fn user(user_id: UserId) -> Self {
        PurgeFilter::Matching {
            session_id: None,
            user_id: Some(user_id),
        }
    }

    /// True when nothing can match.
    pub fn is_empty(&self) -> bool {
        matches!(
            self,
            PurgeFilter::Matching {
                session_id: None,
                user_id: None
            }
        )
    }

    pub fn matches(&self, session: &Session) -> bool {
        match self {
            PurgeFilter::All => true,
            PurgeFilter::Matching {
                session_id,
                user_id,
            } => {
                session_id.is_some_and(|id| id == session.session_id)
                    || user_id.is_some_and(|id| id == session.user_id)
            }
        }
    }
}

/// Counts reported by a purge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeCounts {
    pub sessions_cleared: u64,
    /// Current and retired refresh-token pointers removed
    pub tokens_cleared: u64,
    /// Per-user session index entries removed
    pub cache_cleared: u64,
}

impl PurgeCounts {
    pub fn is_zero(&self) -> bool {
        self.sessions_cleared == 0 && self.tokens_cleared == 0 && self.cache_cleared == 0
    }
}

impl std::ops::AddAssign for PurgeCounts {
    fn add_assign(&mut self, other: Self) {
        self.sessions_cleared += other.sessions_cleared;
        self.tokens_cleared += other.tokens_cleared;
        self.cache_cleared += other.cache_cleared;
    }
}

/// Store occupancy, used by anomaly detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub sessions: u64,
    /// Current refresh tokens, one per live session
    pub refresh_tokens: u64,
    /// Digests kept after rotation to recognise replays
    pub retired_refresh_tokens: u64,
    pub user_indexes: u64,
    /// Sessions active within [`RECENT_ACTIVITY_WINDOW`]
    pub recent_activity: u64,
}

/// Window over which `StoreStats::recent_activity` is counted.
pub const RECENT_ACTIVITY_WINDOW: Duration = Duration::minutes(5);

/// SHA-256 hex digest of a refresh token value.
pub fn digest_refresh_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(user_id: UserId) -> Session {
        let now = Utc::now();
        Session {
            session_id: Uuid::new_v4(),
            user_id,
            email: "ana@example.com".to_string(),
            name: "Ana".to_string(),
            role: "student".to_string(),
            permissions: vec!["courses:read".to_string()],
            refresh_token_digest: digest_refresh_token("rt-1"),
            created_at: now,
            last_activity_at: now,
            access_ttl: Duration::hours(1),
            refresh_ttl: Duration::hours(24),
            refresh_expires_at: now + Duration::hours(24),
            remember_me: false,
        }
    }

    #[test]
    fn test_matches_refresh_token() {
        let s = session(1);
        assert!(s.matches_refresh_token("rt-1"));
        assert!(!s.matches_refresh_token("rt-2"));
    }

    #[test]
    fn test_purge_filter_is_union() {
        let s = session(7);
        assert!(PurgeFilter::user(7).matches(&s));
        assert!(PurgeFilter::session(s.session_id).matches(&s));
        let either = PurgeFilter::Matching {
            session_id: Some(Uuid::new_v4()),
            user_id: Some(7),
        };
        assert!(either.matches(&s));
        assert!(!PurgeFilter::user(8).matches(&s));
    }

    #[test]
    fn test_empty_filter_matches_nothing() {
        let filter = PurgeFilter::Matching {
            session_id: None,
            user_id: None,
        };
        assert!(filter.is_empty());
        assert!(!filter.matches(&session(1)));
    }

    #[test]
    fn test_profile_update_applies_only_present_fields() {
        let mut s = session(1);
        ProfileUpdate {
            name: Some("Ana Maria".to_string()),
            ..Default::default()
        }
        .apply(&mut s);
        assert_eq!(s.name, "Ana Maria");
        assert_eq!(s.role, "student");
    }
}
