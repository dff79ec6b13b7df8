//! Server configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use chrono::Duration;
use portal_auth::{auth::TokenConfig, cleanup::AnomalyThresholds, db::DatabaseConfig};
use std::net::SocketAddr;

/// Complete server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind: SocketAddr,
    /// Session store backend
    pub store: StoreBackend,
    /// Security configuration
    pub security: SecurityConfig,
    /// Token lifetimes
    pub tokens: TokenLifetimes,
    /// Auth cookie settings
    pub cookies: CookieConfig,
    /// Login attempt limiting
    pub rate_limit: LoginRateLimitConfig,
    /// Background expiry sweep and anomaly thresholds
    pub sweeper: SweeperConfig,
    /// Prometheus exporter address, disabled when unset
    pub metrics_bind: Option<SocketAddr>,
    /// Accounts seeded into the in-memory directory
    pub dev_users: Vec<DevUser>,
}

/// Where sessions live
#[derive(Debug, Clone)]
pub enum StoreBackend {
    /// Process memory; sessions do not survive a restart
    Memory,
    /// Shared PostgreSQL store and `users` directory
    Postgres(DatabaseConfig),
}

/// Security-related configuration
#[derive(Clone)]
pub struct SecurityConfig {
    /// JWT signing secret (required)
    pub jwt_secret: String,
    /// Password hashing pepper (required)
    pub password_pepper: String,
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecurityConfig { .. }")
    }
}

/// Token lifetimes in seconds
#[derive(Debug, Clone)]
pub struct TokenLifetimes {
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
    pub remember_me_access_ttl_secs: i64,
    pub remember_me_refresh_ttl_secs: i64,
    /// Upper bound on a single store call, in milliseconds
    pub store_timeout_ms: u64,
}

/// Auth cookie settings
#[derive(Debug, Clone)]
pub struct CookieConfig {
    /// Set `access_token`/`refresh_token` cookies on login and refresh
    pub enabled: bool,
    /// Add the `Secure` attribute
    pub secure: bool,
    /// Every path auth cookies may have been set under; all are cleared on logout
    pub paths: Vec<String>,
}

/// Login attempt limiting
#[derive(Debug, Clone)]
pub struct LoginRateLimitConfig {
    pub max_attempts: usize,
    pub window_secs: u64,
}

/// Periodic sweep settings
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub interval_secs: u64,
    pub thresholds: AnomalyThresholds,
}

/// Account seeded into the in-memory directory (`DEV_USERS`)
#[derive(Clone, PartialEq, Eq)]
pub struct DevUser {
    pub email: String,
    pub password: String,
    pub role: String,
    pub name: String,
}

impl std::fmt::Debug for DevUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevUser")
            .field("email", &self.email)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `bind_override` - Optional bind address override (from CLI args)
    /// * `database_url_override` - Optional database URL override (from CLI args);
    ///   implies the PostgreSQL backend
    ///
    /// # Errors
    ///
    /// Returns error if required variables are missing or invalid
    pub fn from_env(
        bind_override: Option<SocketAddr>,
        database_url_override: Option<String>,
    ) -> Result<Self, ConfigError> {
        let bind = match bind_override {
            Some(bind) => bind,
            None => parse_env_required_format("SERVER_BIND", "127.0.0.1:8080")?,
        };

        let backend = std::env::var("SESSION_STORE").unwrap_or_else(|_| {
            if database_url_override.is_some() {
                "postgres".to_string()
            } else {
                "memory".to_string()
            }
        });
        let store = match backend.to_lowercase().as_str() {
            "memory" => StoreBackend::Memory,
            "postgres" | "postgresql" => {
                let mut database = DatabaseConfig::from_env_or_default();
                if let Some(url) = database_url_override {
                    database.database_url = url;
                }
                StoreBackend::Postgres(database)
            }
            other => {
                return Err(ConfigError::Invalid {
                    var: "SESSION_STORE".to_string(),
                    reason: format!("Unknown backend '{other}', expected memory or postgres"),
                });
            }
        };

        // Security configuration (REQUIRED)
        let jwt_secret = std::env::var("JWT_SECRET").map_err(|_| ConfigError::MissingRequired {
            var: "JWT_SECRET".to_string(),
            hint: "Generate with: openssl rand -hex 32".to_string(),
        })?;

        let password_pepper =
            std::env::var("PASSWORD_PEPPER").map_err(|_| ConfigError::MissingRequired {
                var: "PASSWORD_PEPPER".to_string(),
                hint: "Generate with: openssl rand -hex 16".to_string(),
            })?;

        let tokens = TokenLifetimes {
            access_ttl_secs: parse_env_or("ACCESS_TOKEN_TTL_SECS", 3600),
            refresh_ttl_secs: parse_env_or("REFRESH_TOKEN_TTL_SECS", 86_400),
            remember_me_access_ttl_secs: parse_env_or("REMEMBER_ME_ACCESS_TTL_SECS", 3600),
            remember_me_refresh_ttl_secs: parse_env_or("REMEMBER_ME_REFRESH_TTL_SECS", 604_800),
            store_timeout_ms: parse_env_or("STORE_TIMEOUT_MS", 5000),
        };

        let cookies = CookieConfig {
            enabled: parse_env_or("AUTH_COOKIES", true),
            secure: parse_env_or("SECURE_COOKIES", false),
            paths: std::env::var("AUTH_COOKIE_PATHS")
                .map(|v| split_list(&v, ','))
                .unwrap_or_else(|_| vec!["/".to_string(), "/api".to_string(), "/auth".to_string()]),
        };

        let rate_limit = LoginRateLimitConfig {
            max_attempts: parse_env_or("RATE_LIMIT_LOGIN_ATTEMPTS", 5),
            window_secs: parse_env_or("RATE_LIMIT_LOGIN_WINDOW_SECS", 300),
        };

        let defaults = AnomalyThresholds::default();
        let sweeper = SweeperConfig {
            interval_secs: parse_env_or("SESSION_SWEEP_INTERVAL_SECS", 300),
            thresholds: AnomalyThresholds {
                max_sessions: parse_env_or("ANOMALY_MAX_SESSIONS", defaults.max_sessions),
                max_refresh_tokens: parse_env_or(
                    "ANOMALY_MAX_REFRESH_TOKENS",
                    defaults.max_refresh_tokens,
                ),
                max_recent_activity: parse_env_or(
                    "ANOMALY_MAX_RECENT_ACTIVITY",
                    defaults.max_recent_activity,
                ),
            },
        };

        let metrics_bind = match std::env::var("METRICS_BIND") {
            Ok(v) if !v.trim().is_empty() => {
                Some(v.trim().parse().map_err(|_| ConfigError::Invalid {
                    var: "METRICS_BIND".to_string(),
                    reason: format!("'{v}' is not an IP:PORT address"),
                })?)
            }
            _ => None,
        };

        let dev_users = match std::env::var("DEV_USERS") {
            Ok(v) => parse_dev_users(&v)?,
            Err(_) => Vec::new(),
        };

        Ok(ServerConfig {
            bind,
            store,
            security: SecurityConfig {
                jwt_secret,
                password_pepper,
            },
            tokens,
            cookies,
            rate_limit,
            sweeper,
            metrics_bind,
            dev_users,
        })
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.security.jwt_secret.len() < 32 {
            return Err(ConfigError::Invalid {
                var: "JWT_SECRET".to_string(),
                reason: "Must be at least 32 characters (128-bit security)".to_string(),
            });
        }

        if self.security.password_pepper.len() < 16 {
            return Err(ConfigError::Invalid {
                var: "PASSWORD_PEPPER".to_string(),
                reason: "Must be at least 16 characters (64-bit security)".to_string(),
            });
        }

        let t = &self.tokens;
        for (var, value) in [
            ("ACCESS_TOKEN_TTL_SECS", t.access_ttl_secs),
            ("REFRESH_TOKEN_TTL_SECS", t.refresh_ttl_secs),
            ("REMEMBER_ME_ACCESS_TTL_SECS", t.remember_me_access_ttl_secs),
            ("REMEMBER_ME_REFRESH_TTL_SECS", t.remember_me_refresh_ttl_secs),
        ] {
            if value <= 0 {
                return Err(ConfigError::Invalid {
                    var: var.to_string(),
                    reason: "Must be greater than 0".to_string(),
                });
            }
        }

        if t.refresh_ttl_secs < t.access_ttl_secs {
            return Err(ConfigError::Invalid {
                var: "REFRESH_TOKEN_TTL_SECS".to_string(),
                reason: format!(
                    "Must not be shorter than the access token TTL ({})",
                    t.access_ttl_secs
                ),
            });
        }

        if t.remember_me_refresh_ttl_secs < t.refresh_ttl_secs {
            return Err(ConfigError::Invalid {
                var: "REMEMBER_ME_REFRESH_TTL_SECS".to_string(),
                reason: format!(
                    "Must not be shorter than the normal refresh TTL ({})",
                    t.refresh_ttl_secs
                ),
            });
        }

        if t.store_timeout_ms == 0 || t.store_timeout_ms > 10_000 {
            return Err(ConfigError::Invalid {
                var: "STORE_TIMEOUT_MS".to_string(),
                reason: "Must be between 1 and 10000".to_string(),
            });
        }

        if let Some(bad) = self.cookies.paths.iter().find(|p| !p.starts_with('/')) {
            return Err(ConfigError::Invalid {
                var: "AUTH_COOKIE_PATHS".to_string(),
                reason: format!("Path '{bad}' must start with '/'"),
            });
        }

        if self.rate_limit.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                var: "RATE_LIMIT_LOGIN_ATTEMPTS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.sweeper.interval_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "SESSION_SWEEP_INTERVAL_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Token issuer configuration derived from this server configuration
    pub fn token_config(&self) -> TokenConfig {
        let mut config = TokenConfig::new(
            self.security.jwt_secret.clone(),
            self.security.password_pepper.clone(),
        );
        config.access_ttl = Duration::seconds(self.tokens.access_ttl_secs);
        config.refresh_ttl = Duration::seconds(self.tokens.refresh_ttl_secs);
        config.remember_me_access_ttl = Duration::seconds(self.tokens.remember_me_access_ttl_secs);
        config.remember_me_refresh_ttl =
            Duration::seconds(self.tokens.remember_me_refresh_ttl_secs);
        config.store_timeout = std::time::Duration::from_millis(self.tokens.store_timeout_ms);
        config
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

/// Helper to parse environment variable with default fallback
fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parse a variable whose default is itself a literal to parse
fn parse_env_required_format<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse().map_err(|_| ConfigError::Invalid {
        var: key.to_string(),
        reason: format!("'{raw}' could not be parsed"),
    })
}

fn split_list(raw: &str, separator: char) -> Vec<String> {
    raw.split(separator)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// `email:password:role[:name]` entries separated by commas
fn parse_dev_users(raw: &str) -> Result<Vec<DevUser>, ConfigError> {
    split_list(raw, ',')
        .into_iter()
        .map(|entry| {
            let parts: Vec<&str> = entry.splitn(4, ':').collect();
            match parts.as_slice() {
                [email, password, role] | [email, password, role, _] => Ok(DevUser {
                    email: (*email).to_string(),
                    password: (*password).to_string(),
                    role: (*role).to_string(),
                    name: parts
                        .get(3)
                        .map(|n| (*n).to_string())
                        .unwrap_or_else(|| (*email).to_string()),
                }),
                _ => Err(ConfigError::Invalid {
                    var: "DEV_USERS".to_string(),
                    reason: "Expected email:password:role[:name] entries".to_string(),
                }),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ServerConfig {
        ServerConfig {
            bind: "127.0.0.1:8080".parse().unwrap(),
            store: StoreBackend::Memory,
            security: SecurityConfig {
                jwt_secret: "x".repeat(32),
                password_pepper: "y".repeat(16),
            },
            tokens: TokenLifetimes {
                access_ttl_secs: 3600,
                refresh_ttl_secs: 86_400,
                remember_me_access_ttl_secs: 3600,
                remember_me_refresh_ttl_secs: 604_800,
                store_timeout_ms: 5000,
            },
            cookies: CookieConfig {
                enabled: true,
                secure: false,
                paths: vec!["/".to_string()],
            },
            rate_limit: LoginRateLimitConfig {
                max_attempts: 5,
                window_secs: 300,
            },
            sweeper: SweeperConfig {
                interval_secs: 300,
                thresholds: AnomalyThresholds::default(),
            },
            metrics_bind: None,
            dev_users: vec![],
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_short_secret_rejected() {
        let mut c = config();
        c.security.jwt_secret = "short".to_string();
        let err = c.validate().unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn test_refresh_shorter_than_access_rejected() {
        let mut c = config();
        c.tokens.refresh_ttl_secs = 60;
        assert!(matches!(
            c.validate(),
            Err(ConfigError::Invalid { var, .. }) if var == "REFRESH_TOKEN_TTL_SECS"
        ));
    }

    #[test]
    fn test_cookie_path_must_be_absolute() {
        let mut c = config();
        c.cookies.paths = vec!["api".to_string()];
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_token_config_carries_lifetimes() {
        let mut c = config();
        c.tokens.access_ttl_secs = 900;
        let tc = c.token_config();
        assert_eq!(tc.access_ttl, Duration::minutes(15));
        assert_eq!(tc.remember_me_refresh_ttl, Duration::days(7));
        assert_eq!(tc.store_timeout, std::time::Duration::from_secs(5));
    }

    #[test]
    fn test_parse_dev_users() {
        let users =
            parse_dev_users("ana@portal.test:Secret1:student:Ana, bo@portal.test:pw:admin").unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].name, "Ana");
        assert_eq!(users[1].role, "admin");
        assert_eq!(users[1].name, "bo@portal.test");
        assert!(parse_dev_users("broken-entry").is_err());
    }
}
