//! Background expiry sweep and anomaly check.

use crate::{
    api::rate_limiter::LoginRateLimiter,
    logging::{SecurityEvent, log_security_event},
    metrics,
};
use portal_auth::cleanup::AnomalyMonitor;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;

/// Spawn the periodic sweep task.
///
/// The first tick fires immediately, then every `interval`. A failed sweep
/// is logged and retried on the next tick.
pub fn spawn_sweeper(
    monitor: AnomalyMonitor,
    limiter: Arc<LoginRateLimiter>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match monitor.sweep().await {
                Ok(report) => {
                    metrics::sessions_active(report.stats.sessions);
                    if let Some(anomaly) = report.anomaly {
                        log_security_event(
                            SecurityEvent::GlobalPurge,
                            None,
                            None,
                            &format!(
                                "Global purge after store anomaly ({anomaly}), {} session(s) cleared",
                                report.purged.map_or(0, |c| c.sessions_cleared)
                            ),
                        );
                        metrics::cleanup(SecurityEvent::GlobalPurge.as_str());
                    } else if report.expired_removed > 0 {
                        tracing::info!(
                            removed = report.expired_removed,
                            "Expired sessions swept"
                        );
                    }
                }
                Err(e) => tracing::error!("Session sweep failed: {}", e),
            }

            let pruned = limiter.prune();
            if pruned > 0 {
                tracing::debug!(pruned, "Idle login rate-limit windows dropped");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use portal_auth::cleanup::{AnomalyThresholds, MemoryAuditLog, ServerCleanup};
    use portal_auth::clock::ManualClock;
    use portal_auth::session::{MemorySessionStore, Session, SessionStore};
    use uuid::Uuid;

    fn session(clock: &ManualClock, ttl_secs: i64) -> Session {
        let now = portal_auth::clock::Clock::now(clock);
        Session {
            session_id: Uuid::new_v4(),
            user_id: 1,
            email: "ana@portal.test".into(),
            name: "Ana".into(),
            role: "student".into(),
            permissions: vec![],
            refresh_token_digest: portal_auth::session::digest_refresh_token(
                &Uuid::new_v4().to_string(),
            ),
            created_at: now,
            last_activity_at: now,
            access_ttl: ChronoDuration::seconds(60),
            refresh_ttl: ChronoDuration::seconds(ttl_secs),
            refresh_expires_at: now + ChronoDuration::seconds(ttl_secs),
            remember_me: false,
        }
    }

    #[tokio::test]
    async fn test_sweeper_removes_expired_sessions() {
        let clock = Arc::new(ManualClock::starting_now());
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new(clock.clone()));
        store.create(session(&clock, 10)).await.unwrap();
        store.create(session(&clock, 3600)).await.unwrap();
        clock.advance(ChronoDuration::seconds(60));

        let cleanup = ServerCleanup::new(
            store.clone(),
            Arc::new(MemoryAuditLog::new(16)),
            clock.clone(),
        );
        let monitor = AnomalyMonitor::new(store.clone(), cleanup, AnomalyThresholds::default());
        let limiter = Arc::new(LoginRateLimiter::new(5, Duration::from_secs(60)));

        let handle = spawn_sweeper(monitor, limiter, Duration::from_secs(3600));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        assert_eq!(store.stats().await.unwrap().sessions, 1);
    }
}
