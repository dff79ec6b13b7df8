//! Tracing setup and the security event log.
//!
//! `portal_auth` logs through the `log` facade; `tracing-subscriber` picks
//! those records up alongside the server's own spans. Security-relevant
//! auth events go through [`log_security_event`] so they share one shape:
//! a `SECURITY:` prefix and `event_type`, `user_id` and `ip_address` fields.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "info,portal_auth=info,sqlx=warn,hyper=warn";

/// Install the global subscriber. `RUST_LOG` overrides [`DEFAULT_FILTER`].
///
/// ```no_run
/// portal_server::logging::init();
/// tracing::info!(port = 8080, "Session API listening");
/// ```
pub fn init() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Auth events that end up in the security log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEvent {
    FailedLogin,
    LoginRateLimited,
    /// A retired refresh token was presented again
    RefreshReplay,
    CleanupForbidden,
    EmergencyCleanup,
    /// Every session dropped after a store anomaly
    GlobalPurge,
}

impl SecurityEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            SecurityEvent::FailedLogin => "failed_login",
            SecurityEvent::LoginRateLimited => "login_rate_limited",
            SecurityEvent::RefreshReplay => "refresh_conflict",
            SecurityEvent::CleanupForbidden => "cleanup_forbidden",
            SecurityEvent::EmergencyCleanup => "emergency_cleanup",
            SecurityEvent::GlobalPurge => "global_purge",
        }
    }
}

impl std::fmt::Display for SecurityEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log one security event at `warn`.
///
/// ```
/// use portal_server::logging::{SecurityEvent, log_security_event};
///
/// log_security_event(
///     SecurityEvent::RefreshReplay,
///     Some(42),
///     Some("10.0.0.7"),
///     "Rotated refresh token presented again",
/// );
/// ```
pub fn log_security_event(
    event: SecurityEvent,
    user_id: Option<i64>,
    ip_address: Option<&str>,
    message: &str,
) {
    tracing::warn!(
        event_type = event.as_str(),
        user_id = user_id,
        ip_address = ip_address,
        "SECURITY: {}",
        message
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_stable() {
        assert_eq!(SecurityEvent::RefreshReplay.as_str(), "refresh_conflict");
        assert_eq!(SecurityEvent::GlobalPurge.to_string(), "global_purge");
    }

    #[test]
    fn test_log_without_subscriber_is_harmless() {
        log_security_event(SecurityEvent::CleanupForbidden, Some(7), None, "Cleanup of user 8 refused");
    }
}
