//! Client Session Cache.
//!
//! Holds the client's mirror of its session, persists it to both client
//! stores and keeps it fresh: one timer per session fires `refresh_margin`
//! before the access token expires, and any caller asking for a token inside
//! that margin triggers the same coalesced refresh.
//!
//! Every snapshot change happens under one lock. Logout, and adopting a
//! different session, bump the epoch, so a refresh that was already on the
//! wire is dropped on arrival instead of resurrecting or overwriting a
//! session it no longer belongs to.

use crate::{
    api_client::{AuthBackend, LoginResponse},
    cleanup::{CleanupReport, ClientCleanup},
    config::ClientConfig,
    cookies::CookieJar,
    error::{ClientError, ClientResult},
    refresh::{RefreshCoordinator, RefreshState},
    storage::KeyValueStore,
};
use chrono::{DateTime, Utc};
use portal_auth::{
    CleanupScope,
    auth::{RefreshResult, UserId},
    clock::Clock,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::{sync::Mutex, task::JoinHandle};
use uuid::Uuid;

pub const SESSION_KEY: &str = "session_data";
pub const LAST_ACTIVITY_KEY: &str = "last_activity";

/// What the client remembers about its session. Timestamps are unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSessionSnapshot {
    pub user_id: UserId,
    pub email: String,
    pub name: String,
    pub role: String,
    pub permissions: Vec<String>,
    pub access_token: String,
    pub refresh_token: String,
    pub session_id: Uuid,
    pub expires_at: i64,
    pub refresh_expires_at: i64,
}

impl ClientSessionSnapshot {
    pub fn from_login(login: &LoginResponse, now: DateTime<Utc>) -> Self {
        let now = now.timestamp();
        Self {
            user_id: login.user.id,
            email: login.user.email.clone(),
            name: login.user.name.clone(),
            role: login.user.role.clone(),
            permissions: login.user.permissions.clone(),
            access_token: login.token.clone(),
            refresh_token: login.refresh_token.clone(),
            session_id: login.session_id,
            expires_at: now + login.expires_in,
            refresh_expires_at: now + login.refresh_expires_in,
        }
    }

    fn rotated(&self, result: &RefreshResult, now: DateTime<Utc>) -> Self {
        let now = now.timestamp();
        Self {
            access_token: result.access_token.clone(),
            refresh_token: result.refresh_token.clone(),
            expires_at: now + result.expires_in,
            refresh_expires_at: now + result.refresh_expires_in,
            ..self.clone()
        }
    }

    /// Tokens this snapshot already holds, expressed as a refresh answer.
    fn as_refresh_result(&self, now: DateTime<Utc>) -> RefreshResult {
        let now = now.timestamp();
        RefreshResult {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            session_id: self.session_id,
            expires_in: (self.expires_at - now).max(0),
            refresh_expires_in: (self.refresh_expires_at - now).max(0),
        }
    }

    /// The refresh horizon has passed; nothing can revive this session.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.refresh_expires_at
    }

    pub fn needs_refresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now.timestamp() >= self.expires_at - margin.as_secs() as i64
    }
}

struct RefreshTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct CacheState {
    snapshot: Option<ClientSessionSnapshot>,
    epoch: u64,
    timer: Option<RefreshTimer>,
    next_generation: u64,
}

impl CacheState {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.handle.abort();
        }
    }
}

impl Drop for CacheState {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

struct CacheInner {
    config: ClientConfig,
    persistent: Arc<dyn KeyValueStore>,
    per_session: Arc<dyn KeyValueStore>,
    backend: Arc<dyn AuthBackend>,
    coordinator: RefreshCoordinator,
    cleanup: ClientCleanup,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState>,
}

/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct ClientSessionCache {
    inner: Arc<CacheInner>,
}

impl ClientSessionCache {
    pub fn new(
        config: ClientConfig,
        backend: Arc<dyn AuthBackend>,
        persistent: Arc<dyn KeyValueStore>,
        per_session: Arc<dyn KeyValueStore>,
        jar: Arc<CookieJar>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let coordinator = RefreshCoordinator::new(backend.clone(), config.retry.clone());
        let cleanup = ClientCleanup::new(
            vec![persistent.clone(), per_session.clone()],
            jar,
            config.cookies.clone(),
            backend.clone(),
        );
        Self {
            inner: Arc::new(CacheInner {
                config,
                persistent,
                per_session,
                backend,
                coordinator,
                cleanup,
                clock,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    /// Log in and cache the resulting session.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        remember_me: bool,
    ) -> ClientResult<ClientSessionSnapshot> {
        let response = self.inner.backend.login(email, password, remember_me).await?;
        let snapshot = ClientSessionSnapshot::from_login(&response, self.inner.clock.now());
        self.save(snapshot.clone()).await?;
        log::info!("Logged in as user {} (session {})", snapshot.user_id, snapshot.session_id);
        Ok(snapshot)
    }

    /// Persist `snapshot` to both stores and arm its refresh timer.
    pub async fn save(&self, snapshot: ClientSessionSnapshot) -> ClientResult<()> {
        let mut state = self.inner.state.lock().await;
        self.inner.persist(&snapshot).await?;
        self.inner.adopt(&mut state, snapshot);
        Ok(())
    }

    /// Read the persisted snapshot, persistent store first. `None` when
    /// nothing is stored or the refresh horizon has passed.
    pub async fn load(&self) -> ClientResult<Option<ClientSessionSnapshot>> {
        self.inner.load().await
    }

    /// Adopt the persisted snapshot, if still usable, and re-arm its timer.
    pub async fn restore(&self) -> ClientResult<Option<ClientSessionSnapshot>> {
        let mut state = self.inner.state.lock().await;
        let loaded = self.inner.load().await?;
        if let Some(snapshot) = &loaded {
            log::debug!("Restored session {}", snapshot.session_id);
            self.inner.adopt(&mut state, snapshot.clone());
        }
        Ok(loaded)
    }

    /// Cached access token while it is outside the refresh margin, otherwise
    /// the token from a (possibly shared) refresh. `None` without a session.
    pub async fn get_current_access_token(&self) -> ClientResult<Option<String>> {
        let (session_id, refresh_token, epoch) = {
            let state = self.inner.state.lock().await;
            let Some(snapshot) = &state.snapshot else {
                return Ok(None);
            };
            if !snapshot.needs_refresh(self.inner.clock.now(), self.inner.config.refresh_margin) {
                return Ok(Some(snapshot.access_token.clone()));
            }
            (snapshot.session_id, snapshot.refresh_token.clone(), state.epoch)
        };

        let result = self
            .inner
            .refresh_snapshot(session_id, refresh_token, epoch)
            .await?;
        Ok(Some(result.access_token))
    }

    /// Refresh now, whatever the token's remaining lifetime.
    pub async fn refresh(&self) -> ClientResult<RefreshResult> {
        self.inner.refresh_current().await
    }

    /// Client-side purge, then a best-effort server logout.
    pub async fn logout(&self) -> ClientResult<CleanupReport> {
        let snapshot = self.inner.discard().await;
        let report = self
            .inner
            .cleanup
            .run(CleanupScope::Client, None, None, None)
            .await?;

        if let Some(snapshot) = snapshot
            && let Err(e) = self
                .inner
                .backend
                .logout(Some(snapshot.session_id), Some(&snapshot.refresh_token))
                .await
        {
            log::warn!("Server logout for session {} failed: {e}", snapshot.session_id);
        }
        Ok(report)
    }

    /// Drop the session and run `scope` against it. While the dropped access
    /// token is unexpired it authorizes a purge of every session of the user.
    pub async fn emergency_cleanup(&self, scope: CleanupScope) -> ClientResult<CleanupReport> {
        let snapshot = self.inner.discard().await;
        let now = self.inner.clock.now().timestamp();
        let report = match &snapshot {
            Some(s) => {
                let access_token = (now < s.expires_at).then_some(s.access_token.as_str());
                self.inner
                    .cleanup
                    .run(scope, Some(s.session_id), Some(s.user_id), access_token)
                    .await?
            }
            None => self.inner.cleanup.run(scope, None, None, None).await?,
        };
        if let Some(e) = report.partial_failure() {
            log::warn!("{e}");
        }
        Ok(report)
    }

    pub async fn state(&self, session_id: Uuid) -> RefreshState {
        let coordinator_state = self.inner.coordinator.state(&session_id.to_string());
        if coordinator_state != RefreshState::Valid {
            return coordinator_state;
        }
        let state = self.inner.state.lock().await;
        match &state.snapshot {
            Some(s)
                if s.session_id == session_id
                    && s.needs_refresh(self.inner.clock.now(), self.inner.config.refresh_margin) =>
            {
                RefreshState::NearExpiry
            }
            _ => RefreshState::Valid,
        }
    }

    pub async fn snapshot(&self) -> Option<ClientSessionSnapshot> {
        self.inner.state.lock().await.snapshot.clone()
    }

    pub async fn epoch(&self) -> u64 {
        self.inner.state.lock().await.epoch
    }

    /// Whether a refresh timer is currently armed.
    pub async fn has_timer(&self) -> bool {
        self.inner.state.lock().await.timer.is_some()
    }
}

impl CacheInner {
    async fn persist(&self, snapshot: &ClientSessionSnapshot) -> ClientResult<()> {
        let json = serde_json::to_string(snapshot)?;
        let now = self.clock.now().timestamp().to_string();
        for store in [&self.persistent, &self.per_session] {
            store.set(SESSION_KEY, &json).await?;
            store.set(LAST_ACTIVITY_KEY, &now).await?;
        }
        Ok(())
    }

    async fn forget_persisted(&self) {
        for store in [&self.persistent, &self.per_session] {
            for key in [SESSION_KEY, LAST_ACTIVITY_KEY] {
                if let Err(e) = store.remove(key).await {
                    log::warn!("Failed to remove {key}: {e}");
                }
            }
        }
    }

    async fn load(&self) -> ClientResult<Option<ClientSessionSnapshot>> {
        let raw = match self.persistent.get(SESSION_KEY).await? {
            Some(raw) => Some(raw),
            None => self.per_session.get(SESSION_KEY).await?,
        };
        let Some(raw) = raw else {
            return Ok(None);
        };

        let snapshot: ClientSessionSnapshot = match serde_json::from_str(&raw) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::warn!("Ignoring unreadable {SESSION_KEY}: {e}");
                return Ok(None);
            }
        };
        if snapshot.is_expired(self.clock.now()) {
            log::debug!("Stored session {} is past its refresh horizon", snapshot.session_id);
            return Ok(None);
        }
        Ok(Some(snapshot))
    }

    /// Make `snapshot` current. Switching to another session starts a new
    /// epoch and drops the old session's refresh bookkeeping.
    fn adopt(self: &Arc<Self>, state: &mut CacheState, snapshot: ClientSessionSnapshot) {
        let previous = state.snapshot.as_ref().map(|s| s.session_id);
        if previous != Some(snapshot.session_id) {
            state.epoch += 1;
            if let Some(previous) = previous {
                log::info!("Session {previous} replaced by {}", snapshot.session_id);
                self.coordinator.forget(&previous.to_string());
            }
        }
        self.arm_timer(state, &snapshot);
        state.snapshot = Some(snapshot);
    }

    /// Bump the epoch, stop the timer and hand back the old snapshot.
    async fn discard(&self) -> Option<ClientSessionSnapshot> {
        let snapshot = {
            let mut state = self.state.lock().await;
            state.epoch += 1;
            state.cancel_timer();
            state.snapshot.take()
        };
        if let Some(snapshot) = &snapshot {
            self.coordinator.forget(&snapshot.session_id.to_string());
        }
        snapshot
    }

    async fn refresh_current(self: &Arc<Self>) -> ClientResult<RefreshResult> {
        let (session_id, refresh_token, epoch) = {
            let state = self.state.lock().await;
            let snapshot = state.snapshot.as_ref().ok_or(ClientError::ReloginRequired)?;
            (snapshot.session_id, snapshot.refresh_token.clone(), state.epoch)
        };
        self.refresh_snapshot(session_id, refresh_token, epoch).await
    }

    async fn refresh_snapshot(
        self: &Arc<Self>,
        session_id: Uuid,
        refresh_token: String,
        epoch: u64,
    ) -> ClientResult<RefreshResult> {
        let weak = Arc::downgrade(self);
        let used_token = refresh_token.clone();
        self.coordinator
            .refresh_with(&session_id.to_string(), &refresh_token, move |outcome| async move {
                match weak.upgrade() {
                    Some(inner) => {
                        inner
                            .apply_refresh(epoch, session_id, &used_token, outcome)
                            .await
                    }
                    None => outcome,
                }
            })
            .await
    }

    /// Fold one network outcome into the cache. Runs once per network call.
    ///
    /// A conflict on a token that the cache has already rotated past means
    /// the caller raced a refresh that finished first; it gets the current
    /// tokens instead of tearing the session down.
    async fn apply_refresh(
        self: &Arc<Self>,
        epoch: u64,
        session_id: Uuid,
        used_token: &str,
        outcome: ClientResult<RefreshResult>,
    ) -> ClientResult<RefreshResult> {
        let mut state = self.state.lock().await;
        if state.epoch != epoch {
            log::info!("Discarding refresh result from epoch {epoch} (now {})", state.epoch);
            return Err(ClientError::ReloginRequired);
        }
        if let Some(current) = &state.snapshot
            && current.session_id != session_id
        {
            log::info!(
                "Discarding refresh result for session {session_id}; cache holds {}",
                current.session_id
            );
            return Err(ClientError::ReloginRequired);
        }

        if let (Err(ClientError::RefreshConflict), Some(current)) = (&outcome, &state.snapshot)
            && current.refresh_token != used_token
        {
            log::debug!("Refresh for session {} superseded", current.session_id);
            return Ok(current.as_refresh_result(self.clock.now()));
        }

        match outcome {
            Ok(result) => {
                let Some(current) = &state.snapshot else {
                    return Err(ClientError::ReloginRequired);
                };
                let updated = current.rotated(&result, self.clock.now());
                if let Err(e) = self.persist(&updated).await {
                    log::warn!("Refreshed session {} not persisted: {e}", updated.session_id);
                }
                self.arm_timer(&mut state, &updated);
                state.snapshot = Some(updated);
                Ok(result)
            }
            Err(e) if e.requires_relogin() => {
                log::warn!("Refresh rejected ({e}); dropping session");
                state.cancel_timer();
                state.snapshot = None;
                self.forget_persisted().await;
                Err(e)
            }
            // Transport failures keep the last good snapshot; no token is made up
            Err(e) => Err(e),
        }
    }

    /// Replace any armed timer with one for `snapshot`.
    fn arm_timer(self: &Arc<Self>, state: &mut CacheState, snapshot: &ClientSessionSnapshot) {
        state.cancel_timer();
        let generation = state.next_generation;
        state.next_generation += 1;

        let fire_at = snapshot.expires_at - self.config.refresh_margin.as_secs() as i64;
        let delay = Duration::from_secs((fire_at - self.clock.now().timestamp()).max(0) as u64);
        log::debug!(
            "Refresh for session {} scheduled in {}s",
            snapshot.session_id,
            delay.as_secs()
        );

        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(run_timer(weak, generation, delay));
        state.timer = Some(RefreshTimer { generation, handle });
    }

    async fn on_timer(self: &Arc<Self>, generation: u64) {
        {
            let mut state = self.state.lock().await;
            match &state.timer {
                Some(timer) if timer.generation == generation => {
                    // Detach so a re-arm from this refresh does not abort us
                    state.timer = None;
                }
                _ => return,
            }
        }
        if let Err(e) = self.refresh_current().await {
            log::warn!("Scheduled refresh failed: {e}");
        }
    }
}

async fn run_timer(inner: Weak<CacheInner>, generation: u64, delay: Duration) {
    tokio::time::sleep(delay).await;
    if let Some(inner) = inner.upgrade() {
        inner.on_timer(generation).await;
    }
}

impl std::fmt::Debug for ClientSessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSessionCache")
            .field("base_url", &self.inner.config.base_url)
            .field("coordinator", &self.inner.coordinator)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_auth::auth::UserProfile;

    fn login_response(expires_in: i64, refresh_expires_in: i64) -> LoginResponse {
        LoginResponse {
            token: "access".into(),
            refresh_token: "refresh".into(),
            session_id: Uuid::nil(),
            user: UserProfile {
                id: 3,
                email: "ana@portal.test".into(),
                name: "Ana".into(),
                role: "student".into(),
                permissions: vec!["courses:read".into()],
            },
            expires_in,
            refresh_expires_in,
        }
    }

    #[test]
    fn test_snapshot_timestamps_and_margin() {
        let now = Utc::now();
        let snapshot = ClientSessionSnapshot::from_login(&login_response(3600, 86_400), now);
        assert_eq!(snapshot.expires_at, now.timestamp() + 3600);
        assert!(!snapshot.needs_refresh(now, Duration::from_secs(60)));
        assert!(snapshot.needs_refresh(
            now + chrono::Duration::seconds(3541),
            Duration::from_secs(60)
        ));
        assert!(!snapshot.is_expired(now + chrono::Duration::seconds(86_399)));
        assert!(snapshot.is_expired(now + chrono::Duration::seconds(86_400)));
    }

    #[test]
    fn test_snapshot_json_layout() {
        let snapshot = ClientSessionSnapshot::from_login(&login_response(60, 120), Utc::now());
        let json = serde_json::to_value(&snapshot).unwrap();
        for key in [
            "userId",
            "email",
            "name",
            "role",
            "permissions",
            "accessToken",
            "refreshToken",
            "sessionId",
            "expiresAt",
            "refreshExpiresAt",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn test_rotation_keeps_identity() {
        let now = Utc::now();
        let snapshot = ClientSessionSnapshot::from_login(&login_response(60, 120), now);
        let rotated = snapshot.rotated(
            &RefreshResult {
                access_token: "a2".into(),
                refresh_token: "r2".into(),
                session_id: Uuid::nil(),
                expires_in: 900,
                refresh_expires_in: 1800,
            },
            now,
        );
        assert_eq!(rotated.user_id, 3);
        assert_eq!(rotated.refresh_token, "r2");
        assert_eq!(rotated.expires_at, now.timestamp() + 900);
    }
}
