//! Read-only access to the user directory.
//!
//! The directory is an external collaborator: the token issuer only looks up
//! an account by email at login time to check the password and to annotate
//! the new session with name, role and permissions.

use crate::auth::{AuthResult, models::UserId};
use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Directory entry as seen by the token issuer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub role: String,
    pub permissions: Vec<String>,
    pub password_hash: String,
    pub is_active: bool,
}

impl UserRecord {
    pub fn new(
        id: UserId,
        email: impl Into<String>,
        name: impl Into<String>,
        role: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Self {
        Self {
            id,
            email: email.into(),
            name: name.into(),
            role: role.into(),
            permissions: Vec::new(),
            password_hash: password_hash.into(),
            is_active: true,
        }
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }
}

/// User directory lookups
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Find an account by email, compared case-insensitively.
    async fn find_by_email(&self, email: &str) -> AuthResult<Option<UserRecord>>;

    async fn find_by_id(&self, user_id: UserId) -> AuthResult<Option<UserRecord>>;
}

/// Directory backed by the portal's `users` table
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(r: &PgRow) -> UserRecord {
        UserRecord {
            id: r.get("id"),
            email: r.get("email"),
            name: r.get("name"),
            role: r.get("role"),
            permissions: r.get("permissions"),
            password_hash: r.get("password_hash"),
            is_active: r.get("is_active"),
        }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_email(&self, email: &str) -> AuthResult<Option<UserRecord>> {
        let row = sqlx::query(
            "SELECT id, email, name, role, permissions, password_hash, is_active
             FROM users WHERE lower(email) = lower($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::row_to_record))
    }

    async fn find_by_id(&self, user_id: UserId) -> AuthResult<Option<UserRecord>> {
        let row = sqlx::query(
            "SELECT id, email, name, role, permissions, password_hash, is_active
             FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::row_to_record))
    }
}

/// In-memory directory for development servers and tests
#[derive(Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an account, keyed by lowercase email.
    pub async fn insert(&self, record: UserRecord) {
        self.users
            .write()
            .await
            .insert(record.email.to_lowercase(), record);
    }

    pub async fn deactivate(&self, email: &str) -> bool {
        match self.users.write().await.get_mut(&email.to_lowercase()) {
            Some(record) => {
                record.is_active = false;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_email(&self, email: &str) -> AuthResult<Option<UserRecord>> {
        Ok(self.users.read().await.get(&email.to_lowercase()).cloned())
    }

    async fn find_by_id(&self, user_id: UserId) -> AuthResult<Option<UserRecord>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.id == user_id)
            .cloned())
    }
}
