//! Client runtime configuration.

use std::time::Duration;

/// Where the single static error view lives.
pub const TERMINAL_VIEW: &str = "/auth-error";

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Factor applied to the delay after every failed attempt
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            multiplier: 2,
        }
    }
}

/// Redirect loop guard thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardConfig {
    /// Events older than this are forgotten
    pub window: Duration,
    /// Ring buffer size
    pub capacity: usize,
    /// Redirects to one target within the window that count as a loop
    pub threshold: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(10),
            capacity: 20,
            threshold: 3,
        }
    }
}

/// Every domain and path an auth cookie may have been set under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieVariants {
    pub domains: Vec<String>,
    pub paths: Vec<String>,
}

impl CookieVariants {
    /// `host`, `.host`, `localhost` and `.localhost`, under `/`, `/api` and `/auth`.
    pub fn for_host(host: &str) -> Self {
        let mut domains = Vec::with_capacity(4);
        for domain in [host, "localhost"] {
            let bare = domain.trim_start_matches('.');
            if bare.is_empty() {
                continue;
            }
            for variant in [bare.to_string(), format!(".{bare}")] {
                if !domains.contains(&variant) {
                    domains.push(variant);
                }
            }
        }
        Self {
            domains,
            paths: vec!["/".to_string(), "/api".to_string(), "/auth".to_string()],
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server root, e.g. `http://localhost:8080`
    pub base_url: String,
    /// Refresh this long before the access token expires
    pub refresh_margin: Duration,
    /// Upper bound on every network call
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub guard: GuardConfig,
    pub cookies: CookieVariants,
    /// Route shown when authentication cannot recover
    pub terminal_view: String,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let cookies = CookieVariants::for_host(&host_of(&base_url));
        Self {
            base_url,
            refresh_margin: Duration::from_secs(60),
            request_timeout: Duration::from_secs(8),
            retry: RetryPolicy::default(),
            guard: GuardConfig::default(),
            cookies,
            terminal_view: TERMINAL_VIEW.to_string(),
        }
    }

    /// Defaults overridden by `PORTAL_*` environment variables.
    pub fn from_env(base_url: impl Into<String>) -> Self {
        let mut config = Self::new(base_url);
        config.refresh_margin = Duration::from_secs(parse_env_or(
            "PORTAL_REFRESH_MARGIN_SECS",
            config.refresh_margin.as_secs(),
        ));
        config.request_timeout = Duration::from_millis(parse_env_or(
            "PORTAL_REQUEST_TIMEOUT_MS",
            config.request_timeout.as_millis() as u64,
        ));
        config.retry.max_attempts =
            parse_env_or("PORTAL_RETRY_ATTEMPTS", config.retry.max_attempts).max(1);
        config.guard.threshold =
            parse_env_or("PORTAL_REDIRECT_THRESHOLD", config.guard.threshold).max(1);
        config
    }
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Host part of a URL, without scheme, port or path.
fn host_of(url: &str) -> String {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split('/').next().unwrap_or(rest);
    let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    host.split(':').next().unwrap_or(host).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new("http://portal.example.com:8080/");
        assert_eq!(config.base_url, "http://portal.example.com:8080");
        assert_eq!(config.refresh_margin, Duration::from_secs(60));
        assert_eq!(config.request_timeout, Duration::from_secs(8));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.guard.capacity, 20);
        assert_eq!(config.terminal_view, "/auth-error");
    }

    #[test]
    fn test_cookie_domain_variants() {
        let variants = CookieVariants::for_host("portal.example.com");
        assert_eq!(
            variants.domains,
            vec![
                "portal.example.com",
                ".portal.example.com",
                "localhost",
                ".localhost"
            ]
        );

        let local = CookieVariants::for_host("localhost");
        assert_eq!(local.domains, vec!["localhost", ".localhost"]);
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("https://a.example.com:443/x"), "a.example.com");
        assert_eq!(host_of("localhost:8080"), "localhost");
    }
}
