//! Session store anomaly detection.
//!
//! A runaway login or refresh loop shows up as an exploding store. Each
//! sweep removes expired sessions, then compares occupancy with
//! [`AnomalyThresholds`]; crossing any of them triggers a global purge.

use super::ServerCleanup;
use crate::{
    auth::AuthResult,
    session::{PurgeCounts, SessionStore, StoreStats},
};
use std::sync::Arc;

/// Occupancy limits above which the store is considered to be looping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnomalyThresholds {
    pub max_sessions: u64,
    pub max_refresh_tokens: u64,
    pub max_recent_activity: u64,
}

impl Default for AnomalyThresholds {
    fn default() -> Self {
        Self {
            max_sessions: 10_000,
            max_refresh_tokens: 5_000,
            max_recent_activity: 1_000,
        }
    }
}

/// Which limit was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anomaly {
    TooManySessions(u64),
    TooManyRefreshTokens(u64),
    ActivitySpike(u64),
}

impl std::fmt::Display for Anomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Anomaly::TooManySessions(n) => write!(f, "{n} sessions in store"),
            Anomaly::TooManyRefreshTokens(n) => write!(f, "{n} refresh tokens in store"),
            Anomaly::ActivitySpike(n) => write!(f, "{n} sessions active in the last 5 minutes"),
        }
    }
}

impl AnomalyThresholds {
    pub fn check(&self, stats: &StoreStats) -> Option<Anomaly> {
        if stats.sessions > self.max_sessions {
            Some(Anomaly::TooManySessions(stats.sessions))
        } else if stats.refresh_tokens > self.max_refresh_tokens {
            Some(Anomaly::TooManyRefreshTokens(stats.refresh_tokens))
        } else if stats.recent_activity > self.max_recent_activity {
            Some(Anomaly::ActivitySpike(stats.recent_activity))
        } else {
            None
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_removed: u64,
    pub stats: StoreStats,
    pub anomaly: Option<Anomaly>,
    pub purged: Option<PurgeCounts>,
}

/// Periodic expiry sweep plus anomaly check.
#[derive(Clone)]
pub struct AnomalyMonitor {
    store: Arc<dyn SessionStore>,
    cleanup: ServerCleanup,
    thresholds: AnomalyThresholds,
}

impl AnomalyMonitor {
    pub fn new(
        store: Arc<dyn SessionStore>,
        cleanup: ServerCleanup,
        thresholds: AnomalyThresholds,
    ) -> Self {
        Self {
            store,
            cleanup,
            thresholds,
        }
    }

    pub async fn sweep(&self) -> AuthResult<SweepReport> {
        let expired_removed = self.store.sweep_expired().await?;
        let stats = self.store.stats().await?;
        let anomaly = self.thresholds.check(&stats);

        let purged = match anomaly {
            Some(anomaly) => {
                log::warn!("Session store anomaly detected: {anomaly}");
                Some(
                    self.cleanup
                        .purge_all("system", &anomaly.to_string())
                        .await?,
                )
            }
            None => None,
        };

        if expired_removed > 0 {
            log::debug!("Swept {expired_removed} expired session(s)");
        }

        Ok(SweepReport {
            expired_removed,
            stats,
            anomaly,
            purged,
        })
    }
}
