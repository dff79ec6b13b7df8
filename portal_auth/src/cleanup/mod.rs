//! Emergency cleanup protocol, server half.
//!
//! [`CleanupScope`] is shared with the client crate. The client purges its
//! persisted stores and cookies; [`ServerCleanup`] invalidates matching
//! session store entries and keeps the audit trail.

pub mod anomaly;
pub mod audit;

pub use anomaly::{Anomaly, AnomalyMonitor, AnomalyThresholds, SweepReport};
pub use audit::{AuditLog, AuditRecord, MemoryAuditLog};

use crate::{
    auth::AuthResult,
    clock::Clock,
    session::{PurgeCounts, PurgeFilter, SessionStore},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which surfaces a cleanup touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupScope {
    /// Client persisted stores and cookies
    Client,
    /// Session store entries
    Server,
    /// Both, with an audit record
    Full,
}

impl CleanupScope {
    /// Parse the `action` field of an emergency-cleanup request. Only
    /// `client_cleanup`, `server` and `full` are accepted.
    pub fn from_action(action: &str) -> Option<Self> {
        match action {
            "client_cleanup" => Some(CleanupScope::Client),
            "server" => Some(CleanupScope::Server),
            "full" => Some(CleanupScope::Full),
            _ => None,
        }
    }

    pub fn includes_client(self) -> bool {
        matches!(self, CleanupScope::Client | CleanupScope::Full)
    }

    pub fn includes_server(self) -> bool {
        matches!(self, CleanupScope::Server | CleanupScope::Full)
    }

    /// The `action` value that [`CleanupScope::from_action`] maps back to
    /// `self`. Audit records and metrics use it as the label.
    pub fn as_str(self) -> &'static str {
        match self {
            CleanupScope::Client => "client_cleanup",
            CleanupScope::Server => "server",
            CleanupScope::Full => "full",
        }
    }
}

impl std::fmt::Display for CleanupScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Executes the server side of a cleanup.
#[derive(Clone)]
pub struct ServerCleanup {
    store: Arc<dyn SessionStore>,
    audit: Arc<dyn AuditLog>,
    clock: Arc<dyn Clock>,
}

impl ServerCleanup {
    pub fn new(store: Arc<dyn SessionStore>, audit: Arc<dyn AuditLog>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            audit,
            clock,
        }
    }

    pub fn audit(&self) -> &Arc<dyn AuditLog> {
        &self.audit
    }

    /// Run `scope` against the sessions matched by `filter`.
    ///
    /// `Client` only records that a client purged itself. `Server` purges
    /// matching entries. `Full` purges and appends an audit record. An empty
    /// filter or an already-clean session yields zero counts.
    pub async fn run(
        &self,
        scope: CleanupScope,
        filter: &PurgeFilter,
        actor: &str,
    ) -> AuthResult<PurgeCounts> {
        let counts = if scope.includes_server() && !filter.is_empty() {
            self.store.purge(filter).await?
        } else {
            PurgeCounts::default()
        };

        log::info!(
            "{scope} by {actor}: {} session(s), {} token(s), {} cache entries cleared",
            counts.sessions_cleared,
            counts.tokens_cleared,
            counts.cache_cleared
        );

        if scope != CleanupScope::Server {
            self.record(scope.as_str(), actor, counts).await;
        }
        Ok(counts)
    }

    /// Drop every session in the store.
    pub async fn purge_all(&self, actor: &str, reason: &str) -> AuthResult<PurgeCounts> {
        let counts = self.store.purge(&PurgeFilter::All).await?;
        log::warn!(
            "Global session purge by {actor} ({reason}): {} session(s) cleared",
            counts.sessions_cleared
        );
        self.record("global_purge", actor, counts).await;
        Ok(counts)
    }

    async fn record(&self, action: &str, actor: &str, counts: PurgeCounts) {
        self.audit
            .append(AuditRecord {
                action: action.to_string(),
                timestamp: self.clock.now(),
                actor: actor.to_string(),
                counts,
            })
            .await;
    }
}
