//! Token lifetimes and signing material.

use chrono::Duration;

/// Default bound on a single session store or directory call.
pub const DEFAULT_STORE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Token issuer configuration
#[derive(Clone)]
pub struct TokenConfig {
    /// HS256 signing secret
    pub jwt_secret: String,

    /// Server-side pepper appended to passwords before hashing
    pub pepper: String,

    /// Access token lifetime for normal sessions
    pub access_ttl: Duration,

    /// Refresh horizon for normal sessions
    pub refresh_ttl: Duration,

    /// Access token lifetime when "remember me" was requested
    pub remember_me_access_ttl: Duration,

    /// Refresh horizon when "remember me" was requested
    pub remember_me_refresh_ttl: Duration,

    /// Upper bound for each store/directory call
    pub store_timeout: std::time::Duration,
}

impl TokenConfig {
    /// Configuration with default lifetimes: 1h access tokens, a 24h refresh
    /// horizon, and 7 days with "remember me".
    pub fn new(jwt_secret: impl Into<String>, pepper: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            pepper: pepper.into(),
            access_ttl: Duration::hours(1),
            refresh_ttl: Duration::hours(24),
            remember_me_access_ttl: Duration::hours(1),
            remember_me_refresh_ttl: Duration::days(7),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// `(access_ttl, refresh_ttl)` for the given mode.
    pub fn ttls(&self, remember_me: bool) -> (Duration, Duration) {
        if remember_me {
            (self.remember_me_access_ttl, self.remember_me_refresh_ttl)
        } else {
            (self.access_ttl, self.refresh_ttl)
        }
    }
}

impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("remember_me_access_ttl", &self.remember_me_access_ttl)
            .field("remember_me_refresh_ttl", &self.remember_me_refresh_ttl)
            .field("store_timeout", &self.store_timeout)
            .finish_non_exhaustive()
    }
}
