//! In-process session store.
//!
//! Every operation runs inside one critical section over three indexes:
//! sessions by id, refresh-token digests to their session, and each user's
//! set of session ids. Expired sessions are dropped lazily on access and in
//! bulk by [`SessionStore::sweep_expired`].

use super::{
    SessionStore,
    models::{
        ProfileUpdate, PurgeCounts, PurgeFilter, RECENT_ACTIVITY_WINDOW, RefreshLookup, Session,
        StoreStats, digest_refresh_token,
    },
};
use crate::{
    auth::{AuthError, AuthResult, models::UserId},
    clock::Clock,
};
use async_trait::async_trait;
use chrono::Duration;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct TokenPointer {
    session_id: Uuid,
    retired: bool,
}

#[derive(Default)]
struct Indexes {
    sessions: HashMap<Uuid, Session>,
    tokens: HashMap<String, TokenPointer>,
    users: HashMap<UserId, HashSet<Uuid>>,
}

impl Indexes {
    /// Remove one session with all of its pointers.
    fn remove_session(&mut self, session_id: Uuid) -> PurgeCounts {
        let Some(session) = self.sessions.remove(&session_id) else {
            return PurgeCounts::default();
        };

        let before = self.tokens.len();
        self.tokens.retain(|_, pointer| pointer.session_id != session_id);
        let tokens_cleared = (before - self.tokens.len()) as u64;

        let mut cache_cleared = 0;
        if let Some(ids) = self.users.get_mut(&session.user_id) {
            if ids.remove(&session_id) {
                cache_cleared = 1;
            }
            if ids.is_empty() {
                self.users.remove(&session.user_id);
            }
        }

        PurgeCounts {
            sessions_cleared: 1,
            tokens_cleared,
            cache_cleared,
        }
    }

    fn live(&mut self, session_id: Uuid, now: chrono::DateTime<chrono::Utc>) -> Option<&mut Session> {
        let expired = self.sessions.get(&session_id)?.is_expired(now);
        if expired {
            self.remove_session(session_id);
            return None;
        }
        self.sessions.get_mut(&session_id)
    }
}

/// Session store held in process memory.
pub struct MemorySessionStore {
    indexes: Mutex<Indexes>,
    clock: Arc<dyn Clock>,
}

impl MemorySessionStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            indexes: Mutex::new(Indexes::default()),
            clock,
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: Session) -> AuthResult<()> {
        let mut idx = self.indexes.lock().await;
        if idx.sessions.contains_key(&session.session_id) {
            return Ok(());
        }

        idx.tokens.insert(
            session.refresh_token_digest.clone(),
            TokenPointer {
                session_id: session.session_id,
                retired: false,
            },
        );
        idx.users
            .entry(session.user_id)
            .or_default()
            .insert(session.session_id);
        idx.sessions.insert(session.session_id, session);
        Ok(())
    }

    async fn get(&self, session_id: Uuid) -> AuthResult<Option<Session>> {
        let now = self.clock.now();
        let mut idx = self.indexes.lock().await;
        Ok(idx.live(session_id, now).map(|s| s.clone()))
    }

    async fn resolve_refresh_token(&self, refresh_token: &str) -> AuthResult<RefreshLookup> {
        let now = self.clock.now();
        let digest = digest_refresh_token(refresh_token);
        let mut idx = self.indexes.lock().await;

        let Some(pointer) = idx.tokens.get(&digest).copied() else {
            return Ok(RefreshLookup::Unknown);
        };
        let Some(session) = idx.live(pointer.session_id, now) else {
            return Ok(RefreshLookup::Unknown);
        };

        if pointer.retired || !session.matches_refresh_token(refresh_token) {
            return Ok(RefreshLookup::Retired {
                session_id: pointer.session_id,
            });
        }
        Ok(RefreshLookup::Current(session.clone()))
    }

    async fn rotate(
        &self,
        old_refresh_token: &str,
        new_refresh_token: &str,
        new_ttl: Duration,
    ) -> AuthResult<Session> {
        let now = self.clock.now();
        let old_digest = digest_refresh_token(old_refresh_token);
        let new_digest = digest_refresh_token(new_refresh_token);
        let mut idx = self.indexes.lock().await;

        let pointer = idx
            .tokens
            .get(&old_digest)
            .copied()
            .ok_or(AuthError::InvalidRefreshToken)?;
        if pointer.retired {
            return Err(AuthError::RefreshConflict);
        }

        let session = idx
            .live(pointer.session_id, now)
            .ok_or(AuthError::InvalidRefreshToken)?;
        if !session.matches_refresh_token(old_refresh_token) {
            return Err(AuthError::RefreshConflict);
        }

        session.refresh_token_digest.clone_from(&new_digest);
        session.last_activity_at = now;
        session.refresh_ttl = new_ttl;
        session.refresh_expires_at = now + new_ttl;
        let rotated = session.clone();

        idx.tokens.insert(
            old_digest,
            TokenPointer {
                session_id: pointer.session_id,
                retired: true,
            },
        );
        idx.tokens.insert(
            new_digest,
            TokenPointer {
                session_id: pointer.session_id,
                retired: false,
            },
        );
        Ok(rotated)
    }

    async fn touch(&self, session_id: Uuid) -> AuthResult<bool> {
        let now = self.clock.now();
        let mut idx = self.indexes.lock().await;
        match idx.live(session_id, now) {
            Some(session) => {
                session.last_activity_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_profile(&self, user_id: UserId, update: &ProfileUpdate) -> AuthResult<u64> {
        let mut idx = self.indexes.lock().await;
        let ids: Vec<Uuid> = idx
            .users
            .get(&user_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();

        let mut updated = 0;
        for id in ids {
            if let Some(session) = idx.sessions.get_mut(&id) {
                update.apply(session);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn list_for_user(&self, user_id: UserId) -> AuthResult<Vec<Session>> {
        let now = self.clock.now();
        let idx = self.indexes.lock().await;
        let mut sessions: Vec<Session> = idx
            .users
            .get(&user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| idx.sessions.get(id))
            .filter(|s| !s.is_expired(now))
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    async fn purge(&self, filter: &PurgeFilter) -> AuthResult<PurgeCounts> {
        let mut idx = self.indexes.lock().await;

        if *filter == PurgeFilter::All {
            let counts = PurgeCounts {
                sessions_cleared: idx.sessions.len() as u64,
                tokens_cleared: idx.tokens.len() as u64,
                cache_cleared: idx.users.values().map(|ids| ids.len() as u64).sum(),
            };
            *idx = Indexes::default();
            return Ok(counts);
        }

        let doomed: Vec<Uuid> = idx
            .sessions
            .values()
            .filter(|s| filter.matches(s))
            .map(|s| s.session_id)
            .collect();

        let mut counts = PurgeCounts::default();
        for id in doomed {
            counts += idx.remove_session(id);
        }
        Ok(counts)
    }

    async fn sweep_expired(&self) -> AuthResult<u64> {
        let now = self.clock.now();
        let mut idx = self.indexes.lock().await;
        let expired: Vec<Uuid> = idx
            .sessions
            .values()
            .filter(|s| s.is_expired(now))
            .map(|s| s.session_id)
            .collect();

        for id in &expired {
            idx.remove_session(*id);
        }
        Ok(expired.len() as u64)
    }

    async fn stats(&self) -> AuthResult<StoreStats> {
        let now = self.clock.now();
        let idx = self.indexes.lock().await;
        let retired = idx.tokens.values().filter(|p| p.retired).count() as u64;
        Ok(StoreStats {
            sessions: idx.sessions.len() as u64,
            refresh_tokens: idx.tokens.len() as u64 - retired,
            retired_refresh_tokens: retired,
            user_indexes: idx.users.len() as u64,
            recent_activity: idx
                .sessions
                .values()
                .filter(|s| now - s.last_activity_at <= RECENT_ACTIVITY_WINDOW)
                .count() as u64,
        })
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Utc;

    fn session(user_id: UserId, refresh_token: &str, clock: &ManualClock) -> Session {
        let now = clock.now();
        Session {
            session_id: Uuid::new_v4(),
            user_id,
            email: format!("user{user_id}@example.com"),
            name: format!("User {user_id}"),
            role: "student".to_string(),
            permissions: vec![],
            refresh_token_digest: digest_refresh_token(refresh_token),
            created_at: now,
            last_activity_at: now,
            access_ttl: Duration::hours(1),
            refresh_ttl: Duration::hours(24),
            refresh_expires_at: now + Duration::hours(24),
            remember_me: false,
        }
    }

    fn store() -> (Arc<ManualClock>, MemorySessionStore) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = MemorySessionStore::new(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let (clock, store) = store();
        let s = session(1, "rt-a", &clock);
        store.create(s.clone()).await.unwrap();

        let mut renamed = s.clone();
        renamed.name = "Changed".to_string();
        store.create(renamed).await.unwrap();

        let stored = store.get(s.session_id).await.unwrap().unwrap();
        assert_eq!(stored.name, s.name);
        assert_eq!(store.stats().await.unwrap().sessions, 1);
    }

    #[tokio::test]
    async fn test_rotate_retires_old_value() {
        let (clock, store) = store();
        let s = session(1, "rt-a", &clock);
        store.create(s.clone()).await.unwrap();

        let rotated = store.rotate("rt-a", "rt-b", Duration::hours(24)).await.unwrap();
        assert!(rotated.matches_refresh_token("rt-b"));

        assert!(matches!(
            store.rotate("rt-a", "rt-c", Duration::hours(24)).await,
            Err(AuthError::RefreshConflict)
        ));
        assert_eq!(
            store.resolve_refresh_token("rt-a").await.unwrap(),
            RefreshLookup::Retired {
                session_id: s.session_id
            }
        );
        let current = store.get(s.session_id).await.unwrap().unwrap();
        assert!(current.matches_refresh_token("rt-b"));
    }

    #[tokio::test]
    async fn test_rotate_unknown_token_leaves_store_untouched() {
        let (clock, store) = store();
        store.create(session(1, "rt-a", &clock)).await.unwrap();
        let before = store.stats().await.unwrap();

        assert!(matches!(
            store.rotate("forged", "rt-x", Duration::hours(1)).await,
            Err(AuthError::InvalidRefreshToken)
        ));
        assert_eq!(store.stats().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_concurrent_rotation_has_one_winner() {
        let (clock, store) = store();
        store.create(session(1, "rt-a", &clock)).await.unwrap();
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .rotate("rt-a", &format!("rt-next-{i}"), Duration::hours(24))
                    .await
            }));
        }

        let mut wins = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(AuthError::RefreshConflict) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(conflicts, 7);
    }

    #[tokio::test]
    async fn test_expired_session_is_not_found() {
        let (clock, store) = store();
        let s = session(1, "rt-a", &clock);
        store.create(s.clone()).await.unwrap();

        clock.advance(Duration::hours(25));
        assert!(store.get(s.session_id).await.unwrap().is_none());
        assert!(matches!(
            store.rotate("rt-a", "rt-b", Duration::hours(24)).await,
            Err(AuthError::InvalidRefreshToken)
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_all_pointers() {
        let (clock, store) = store();
        let s = session(1, "rt-a", &clock);
        store.create(s.clone()).await.unwrap();
        store.rotate("rt-a", "rt-b", Duration::hours(24)).await.unwrap();

        let counts = store.delete(s.session_id).await.unwrap();
        assert_eq!(counts.sessions_cleared, 1);
        assert_eq!(counts.tokens_cleared, 2);
        assert_eq!(counts.cache_cleared, 1);
        assert_eq!(store.resolve_refresh_token("rt-a").await.unwrap(), RefreshLookup::Unknown);
        assert_eq!(store.resolve_refresh_token("rt-b").await.unwrap(), RefreshLookup::Unknown);

        let again = store.delete(s.session_id).await.unwrap();
        assert!(again.is_zero());
    }

    #[tokio::test]
    async fn test_purge_by_user_keeps_other_users() {
        let (clock, store) = store();
        store.create(session(1, "a1", &clock)).await.unwrap();
        store.create(session(1, "a2", &clock)).await.unwrap();
        let other = session(2, "b1", &clock);
        store.create(other.clone()).await.unwrap();

        let counts = store.purge(&PurgeFilter::user(1)).await.unwrap();
        assert_eq!(counts.sessions_cleared, 2);
        assert!(store.get(other.session_id).await.unwrap().is_some());
        assert!(store.list_for_user(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_profile_touches_every_user_session() {
        let (clock, store) = store();
        store.create(session(1, "a1", &clock)).await.unwrap();
        store.create(session(1, "a2", &clock)).await.unwrap();

        let update = ProfileUpdate {
            role: Some("instructor".to_string()),
            permissions: Some(vec!["classes:write".to_string()]),
            ..Default::default()
        };
        assert_eq!(store.update_profile(1, &update).await.unwrap(), 2);
        for s in store.list_for_user(1).await.unwrap() {
            assert_eq!(s.role, "instructor");
            assert_eq!(s.permissions, vec!["classes:write".to_string()]);
        }
    }

    #[tokio::test]
    async fn test_sweep_expired_and_stats() {
        let (clock, store) = store();
        store.create(session(1, "a1", &clock)).await.unwrap();
        clock.advance(Duration::hours(12));
        store.create(session(2, "b1", &clock)).await.unwrap();
        clock.advance(Duration::hours(13));

        assert_eq!(store.sweep_expired().await.unwrap(), 1);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.user_indexes, 1);
        assert_eq!(stats.recent_activity, 0);
    }

    #[tokio::test]
    async fn test_stats_count_retired_digests_apart() {
        let (clock, store) = store();
        store.create(session(1, "rt-0", &clock)).await.unwrap();
        for n in 1..=3 {
            store
                .rotate(&format!("rt-{}", n - 1), &format!("rt-{n}"), Duration::hours(24))
                .await
                .unwrap();
        }

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.refresh_tokens, 1);
        assert_eq!(stats.retired_refresh_tokens, 3);
    }
}
