//! Client side of the emergency cleanup protocol.
//!
//! The local purge always runs to completion first. Telling the server is
//! best-effort: a failure there lands in the report, never in an `Err`.

use crate::{
    api_client::{AuthBackend, CleanupNotice},
    config::CookieVariants,
    cookies::CookieJar,
    error::{ClientError, ClientResult},
    storage::KeyValueStore,
};
use portal_auth::{CleanupScope, auth::UserId, session::PurgeCounts};
use std::sync::Arc;
use uuid::Uuid;

/// Storage keys that may hold auth state.
pub const KNOWN_KEYS: &[&str] = &[
    "session_data",
    "last_activity",
    "accessToken",
    "auth_token",
    "token",
    "authToken",
    "user",
    "userSession",
    "refreshToken",
    "sessionData",
    "lastActivity",
];

/// Any key starting with one of these is auth state too.
pub const KEY_PREFIXES: &[&str] = &["portal_", "auth_", "session_", "cache_", "user_"];

/// Cookies expired by a client purge.
pub const AUTH_COOKIE_NAMES: &[&str] = &[
    "accessToken",
    "access_token",
    "auth_token",
    "token",
    "authToken",
    "session",
    "sessionId",
    "refreshToken",
    "refresh_token",
    "user_session",
    "jid",
    "csrf_token",
    "remember_token",
];

pub fn is_auth_key(key: &str) -> bool {
    KNOWN_KEYS.contains(&key) || KEY_PREFIXES.iter().any(|p| key.starts_with(p))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientPurgeCounts {
    pub keys_cleared: u64,
    pub cookies_cleared: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub scope: CleanupScope,
    pub client: ClientPurgeCounts,
    /// Counts answered by the server, when it was asked and answered
    pub server: Option<PurgeCounts>,
    pub server_error: Option<ClientError>,
}

impl CleanupReport {
    pub fn partial_failure(&self) -> Option<ClientError> {
        self.server_error
            .as_ref()
            .map(|e| ClientError::CleanupPartialFailure(e.to_string()))
    }
}

pub struct ClientCleanup {
    stores: Vec<Arc<dyn KeyValueStore>>,
    jar: Arc<CookieJar>,
    variants: CookieVariants,
    backend: Arc<dyn AuthBackend>,
}

impl ClientCleanup {
    pub fn new(
        stores: Vec<Arc<dyn KeyValueStore>>,
        jar: Arc<CookieJar>,
        variants: CookieVariants,
        backend: Arc<dyn AuthBackend>,
    ) -> Self {
        Self {
            stores,
            jar,
            variants,
            backend,
        }
    }

    /// Run `scope`. Only a local storage failure is an error; running it
    /// again on clean state reports zero counts.
    ///
    /// The server is told for `Server` and `Full`. A `user_id` target is
    /// only sent along with `access_token`, which the server checks it
    /// against; without one the notice targets `session_id` alone.
    pub async fn run(
        &self,
        scope: CleanupScope,
        session_id: Option<Uuid>,
        user_id: Option<UserId>,
        access_token: Option<&str>,
    ) -> ClientResult<CleanupReport> {
        let client = if scope.includes_client() {
            self.purge_local().await?
        } else {
            ClientPurgeCounts::default()
        };

        let (server, server_error) = if scope.includes_server() {
            let notice = CleanupNotice {
                action: scope.as_str().to_string(),
                session_id,
                user_id: access_token.and(user_id),
            };
            match self.backend.notify_cleanup(&notice, access_token).await {
                Ok(counts) => (Some(counts), None),
                Err(e) => {
                    log::warn!("Server cleanup notification failed: {e}");
                    (None, Some(e))
                }
            }
        } else {
            (None, None)
        };

        log::info!(
            "Cleanup {scope}: {} keys, {} cookies cleared",
            client.keys_cleared,
            client.cookies_cleared
        );

        Ok(CleanupReport {
            scope,
            client,
            server,
            server_error,
        })
    }

    async fn purge_local(&self) -> ClientResult<ClientPurgeCounts> {
        let mut counts = ClientPurgeCounts::default();

        for store in &self.stores {
            for key in store.keys().await? {
                if is_auth_key(&key) && store.remove(&key).await? {
                    counts.keys_cleared += 1;
                }
            }
        }

        for name in AUTH_COOKIE_NAMES {
            for domain in &self.variants.domains {
                for path in &self.variants.paths {
                    if self.jar.expire(name, domain, path) {
                        counts.cookies_cleared += 1;
                    }
                }
            }
        }

        Ok(counts)
    }
}
