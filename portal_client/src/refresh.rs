//! Refresh Coordinator.
//!
//! At most one network refresh runs per session id. Callers arriving while
//! one is in flight await the same shared future and receive its outcome,
//! so the backend sees a single rotation and the cache is updated once.
//!
//! ```text
//! Valid -> NearExpiry -> Refreshing -> Valid
//!                                   \-> Failed (re-login required)
//! ```

use crate::{
    api_client::AuthBackend,
    config::RetryPolicy,
    error::ClientResult,
};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use portal_auth::auth::RefreshResult;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

/// Lifecycle of one client session's tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Valid,
    /// Inside the refresh margin, no refresh started yet
    NearExpiry,
    Refreshing,
    /// Last refresh failed, retries included; the user has to log in again
    Failed,
}

type SharedRefresh = Shared<BoxFuture<'static, ClientResult<RefreshResult>>>;

#[derive(Default)]
struct Entry {
    failed: bool,
    in_flight: Option<SharedRefresh>,
}

pub struct RefreshCoordinator {
    backend: Arc<dyn AuthBackend>,
    retry: RetryPolicy,
    entries: Mutex<HashMap<String, Entry>>,
}

impl RefreshCoordinator {
    pub fn new(backend: Arc<dyn AuthBackend>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            retry,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Refresh without a completion step.
    pub async fn refresh(
        &self,
        session_id: &str,
        refresh_token: &str,
    ) -> ClientResult<RefreshResult> {
        self.refresh_with(session_id, refresh_token, |outcome| async move { outcome })
            .await
    }

    /// Refresh `session_id`, or join the refresh already running for it.
    ///
    /// `apply` runs once per network call, inside the shared future, and its
    /// output is what every waiter receives. When joining an in-flight
    /// refresh, the given `refresh_token` and `apply` are unused.
    ///
    /// Transient failures are retried per the [`RetryPolicy`]; rejections
    /// are returned on the first attempt.
    pub async fn refresh_with<F, Fut>(
        &self,
        session_id: &str,
        refresh_token: &str,
        apply: F,
    ) -> ClientResult<RefreshResult>
    where
        F: FnOnce(ClientResult<RefreshResult>) -> Fut + Send + 'static,
        Fut: Future<Output = ClientResult<RefreshResult>> + Send + 'static,
    {
        let shared = {
            let mut entries = self.entries();
            let entry = entries.entry(session_id.to_string()).or_default();
            match &entry.in_flight {
                Some(in_flight) => {
                    log::debug!("Joining in-flight refresh for session {session_id}");
                    in_flight.clone()
                }
                None => {
                    let backend = self.backend.clone();
                    let retry = self.retry.clone();
                    let token = refresh_token.to_string();
                    let future = async move {
                        let outcome = retry.execute(|| backend.refresh(&token)).await;
                        apply(outcome).await
                    }
                    .boxed()
                    .shared();
                    entry.in_flight = Some(future.clone());
                    future
                }
            }
        };

        let outcome = shared.clone().await;

        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(session_id)
            && entry
                .in_flight
                .as_ref()
                .is_some_and(|in_flight| in_flight.ptr_eq(&shared))
        {
            entry.in_flight = None;
            entry.failed = outcome.is_err();
        }
        outcome
    }

    /// `Refreshing`, `Failed` or `Valid`. `NearExpiry` depends on the token's
    /// expiry and is decided by the cache.
    pub fn state(&self, session_id: &str) -> RefreshState {
        match self.entries().get(session_id) {
            Some(entry) if entry.in_flight.is_some() => RefreshState::Refreshing,
            Some(entry) if entry.failed => RefreshState::Failed,
            _ => RefreshState::Valid,
        }
    }

    /// Drop bookkeeping for a session. A refresh still in flight finishes
    /// on its own; its `apply` step decides what to do with the result.
    pub fn forget(&self, session_id: &str) {
        self.entries().remove(session_id);
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("retry", &self.retry)
            .field("sessions", &self.entries().len())
            .finish()
    }
}
