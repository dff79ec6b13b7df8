//! Database module providing PostgreSQL connection pooling and the auth schema.
//!
//! The session tables are owned by this crate and created by
//! [`Database::migrate`]. The `users` table belongs to the user directory
//! collaborator and is only read.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

pub mod config;
pub mod repository;
pub mod timeouts;

pub use config::DatabaseConfig;
pub use repository::{MemoryUserDirectory, PgUserDirectory, UserDirectory, UserRecord};
pub use timeouts::with_store_timeout;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS auth_sessions (
        session_id         UUID PRIMARY KEY,
        user_id            BIGINT NOT NULL,
        email              TEXT NOT NULL,
        name               TEXT NOT NULL,
        role               TEXT NOT NULL,
        permissions        TEXT[] NOT NULL DEFAULT '{}',
        refresh_token_hash TEXT NOT NULL UNIQUE,
        created_at         TIMESTAMPTZ NOT NULL,
        last_activity_at   TIMESTAMPTZ NOT NULL,
        access_ttl_secs    BIGINT NOT NULL,
        refresh_ttl_secs   BIGINT NOT NULL,
        refresh_expires_at TIMESTAMPTZ NOT NULL,
        remember_me        BOOLEAN NOT NULL DEFAULT FALSE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS auth_sessions_user_idx ON auth_sessions (user_id)",
    "CREATE INDEX IF NOT EXISTS auth_sessions_expiry_idx ON auth_sessions (refresh_expires_at)",
    r#"
    CREATE TABLE IF NOT EXISTS auth_retired_refresh_tokens (
        token_hash TEXT PRIMARY KEY,
        session_id UUID NOT NULL REFERENCES auth_sessions (session_id) ON DELETE CASCADE,
        retired_at TIMESTAMPTZ NOT NULL
    )
    "#,
];

/// Database connection pool wrapper
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    ///
    /// # Arguments
    ///
    /// * `config` - Database configuration
    ///
    /// # Returns
    ///
    /// * `Result<Database, sqlx::Error>` - Database instance or error
    pub async fn new(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .connect(&config.database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the session tables if they do not exist yet.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        log::info!("Auth schema is up to date");
        Ok(())
    }

    /// Check if the database connection is healthy
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Close the database connection pool
    pub async fn close(self) {
        self.pool.close().await;
    }
}
