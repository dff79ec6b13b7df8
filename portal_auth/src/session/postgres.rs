//! PostgreSQL session store.
//!
//! Sessions live in `auth_sessions`, keyed by id, with the current refresh
//! token digest under a unique index. Rotated digests move to
//! `auth_retired_refresh_tokens` so a replay can be told apart from a forgery.
//! Rotation is a single conditional `UPDATE ... WHERE refresh_token_hash = $old`;
//! row locking makes the first committed writer win.

use super::{
    SessionStore,
    models::{
        ProfileUpdate, PurgeCounts, PurgeFilter, RECENT_ACTIVITY_WINDOW, RefreshLookup, Session,
        StoreStats, digest_refresh_token,
    },
};
use crate::{
    auth::{AuthError, AuthResult, models::UserId},
    clock::Clock,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use std::sync::Arc;
use uuid::Uuid;

const SESSION_COLUMNS: &str = "session_id, user_id, email, name, role, permissions, \
     refresh_token_hash, created_at, last_activity_at, access_ttl_secs, refresh_ttl_secs, \
     refresh_expires_at, remember_me";

/// Session store backed by PostgreSQL
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgSessionStore {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    fn row_to_session(row: &PgRow) -> Session {
        Session {
            session_id: row.get("session_id"),
            user_id: row.get("user_id"),
            email: row.get("email"),
            name: row.get("name"),
            role: row.get("role"),
            permissions: row.get("permissions"),
            refresh_token_digest: row.get("refresh_token_hash"),
            created_at: row.get("created_at"),
            last_activity_at: row.get("last_activity_at"),
            access_ttl: Duration::seconds(row.get("access_ttl_secs")),
            refresh_ttl: Duration::seconds(row.get("refresh_ttl_secs")),
            refresh_expires_at: row.get("refresh_expires_at"),
            remember_me: row.get("remember_me"),
        }
    }

    async fn purge_where(
        &self,
        session_id: Option<Uuid>,
        user_id: Option<UserId>,
    ) -> AuthResult<PurgeCounts> {
        let mut tx = self.pool.begin().await?;

        let retired = sqlx::query(
            r#"
            DELETE FROM auth_retired_refresh_tokens
            WHERE session_id IN (
                SELECT session_id FROM auth_sessions
                WHERE ($1::uuid IS NOT NULL AND session_id = $1)
                   OR ($2::bigint IS NOT NULL AND user_id = $2)
            )
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let sessions = sqlx::query(
            r#"
            DELETE FROM auth_sessions
            WHERE ($1::uuid IS NOT NULL AND session_id = $1)
               OR ($2::bigint IS NOT NULL AND user_id = $2)
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        Ok(PurgeCounts {
            sessions_cleared: sessions,
            tokens_cleared: sessions + retired,
            cache_cleared: sessions,
        })
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, session: Session) -> AuthResult<()> {
        sqlx::query(
            r#"
            INSERT INTO auth_sessions (session_id, user_id, email, name, role, permissions,
                refresh_token_hash, created_at, last_activity_at, access_ttl_secs,
                refresh_ttl_secs, refresh_expires_at, remember_me)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (session_id) DO NOTHING
            "#,
        )
        .bind(session.session_id)
        .bind(session.user_id)
        .bind(&session.email)
        .bind(&session.name)
        .bind(&session.role)
        .bind(&session.permissions)
        .bind(&session.refresh_token_digest)
        .bind(session.created_at)
        .bind(session.last_activity_at)
        .bind(session.access_ttl.num_seconds())
        .bind(session.refresh_ttl.num_seconds())
        .bind(session.refresh_expires_at)
        .bind(session.remember_me)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, session_id: Uuid) -> AuthResult<Option<Session>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM auth_sessions \
             WHERE session_id = $1 AND refresh_expires_at > $2"
        ))
        .bind(session_id)
        .bind(self.clock.now())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(Self::row_to_session))
    }

    async fn resolve_refresh_token(&self, refresh_token: &str) -> AuthResult<RefreshLookup> {
        let digest = digest_refresh_token(refresh_token);
        let now = self.clock.now();

        let current = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM auth_sessions \
             WHERE refresh_token_hash = $1 AND refresh_expires_at > $2"
        ))
        .bind(&digest)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = current {
            return Ok(RefreshLookup::Current(Self::row_to_session(&row)));
        }

        let retired = sqlx::query(
            r#"
            SELECT r.session_id FROM auth_retired_refresh_tokens r
            JOIN auth_sessions s ON s.session_id = r.session_id
            WHERE r.token_hash = $1 AND s.refresh_expires_at > $2
            "#,
        )
        .bind(&digest)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match retired {
            Some(row) => RefreshLookup::Retired {
                session_id: row.get("session_id"),
            },
            None => RefreshLookup::Unknown,
        })
    }

    async fn rotate(
        &self,
        old_refresh_token: &str,
        new_refresh_token: &str,
        new_ttl: Duration,
    ) -> AuthResult<Session> {
        let old_digest = digest_refresh_token(old_refresh_token);
        let new_digest = digest_refresh_token(new_refresh_token);
        let now: DateTime<Utc> = self.clock.now();

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "UPDATE auth_sessions \
             SET refresh_token_hash = $2, last_activity_at = $3, \
                 refresh_ttl_secs = $4, refresh_expires_at = $5 \
             WHERE refresh_token_hash = $1 AND refresh_expires_at > $3 \
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(&old_digest)
        .bind(&new_digest)
        .bind(now)
        .bind(new_ttl.num_seconds())
        .bind(now + new_ttl)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            let replayed = sqlx::query(
                "SELECT 1 FROM auth_retired_refresh_tokens WHERE token_hash = $1",
            )
            .bind(&old_digest)
            .fetch_optional(&self.pool)
            .await?;
            return Err(if replayed.is_some() {
                AuthError::RefreshConflict
            } else {
                AuthError::InvalidRefreshToken
            });
        };
        let session = Self::row_to_session(&row);

        sqlx::query(
            r#"
            INSERT INTO auth_retired_refresh_tokens (token_hash, session_id, retired_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (token_hash) DO NOTHING
            "#,
        )
        .bind(&old_digest)
        .bind(session.session_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(session)
    }

    async fn touch(&self, session_id: Uuid) -> AuthResult<bool> {
        let now = self.clock.now();
        let result = sqlx::query(
            "UPDATE auth_sessions SET last_activity_at = $2 \
             WHERE session_id = $1 AND refresh_expires_at > $2",
        )
        .bind(session_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_profile(&self, user_id: UserId, update: &ProfileUpdate) -> AuthResult<u64> {
        if update.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            UPDATE auth_sessions
            SET name = COALESCE($2, name),
                role = COALESCE($3, role),
                permissions = COALESCE($4, permissions)
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(&update.name)
        .bind(&update.role)
        .bind(&update.permissions)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_for_user(&self, user_id: UserId) -> AuthResult<Vec<Session>> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM auth_sessions \
             WHERE user_id = $1 AND refresh_expires_at > $2 \
             ORDER BY created_at"
        ))
        .bind(user_id)
        .bind(self.clock.now())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(Self::row_to_session).collect())
    }

    async fn purge(&self, filter: &PurgeFilter) -> AuthResult<PurgeCounts> {
        match filter {
            PurgeFilter::All => {
                let mut tx = self.pool.begin().await?;
                let retired = sqlx::query("DELETE FROM auth_retired_refresh_tokens")
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
                let sessions = sqlx::query("DELETE FROM auth_sessions")
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
                tx.commit().await?;
                Ok(PurgeCounts {
                    sessions_cleared: sessions,
                    tokens_cleared: sessions + retired,
                    cache_cleared: sessions,
                })
            }
            PurgeFilter::Matching {
                session_id: None,
                user_id: None,
            } => Ok(PurgeCounts::default()),
            PurgeFilter::Matching {
                session_id,
                user_id,
            } => self.purge_where(*session_id, *user_id).await,
        }
    }

    async fn sweep_expired(&self) -> AuthResult<u64> {
        let result = sqlx::query("DELETE FROM auth_sessions WHERE refresh_expires_at <= $1")
            .bind(self.clock.now())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn stats(&self) -> AuthResult<StoreStats> {
        let now = self.clock.now();
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM auth_sessions) AS sessions,
                (SELECT COUNT(*) FROM auth_retired_refresh_tokens) AS retired,
                (SELECT COUNT(DISTINCT user_id) FROM auth_sessions) AS users,
                (SELECT COUNT(*) FROM auth_sessions WHERE last_activity_at >= $1) AS recent
            "#,
        )
        .bind(now - RECENT_ACTIVITY_WINDOW)
        .fetch_one(&self.pool)
        .await?;

        let sessions = row.get::<i64, _>("sessions") as u64;
        Ok(StoreStats {
            sessions,
            refresh_tokens: sessions,
            retired_refresh_tokens: row.get::<i64, _>("retired") as u64,
            user_indexes: row.get::<i64, _>("users") as u64,
            recent_activity: row.get::<i64, _>("recent") as u64,
        })
    }

    async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::db::{Database, DatabaseConfig};

    async fn setup_store() -> PgSessionStore {
        let config = DatabaseConfig::from_env_or_default();
        let db = Database::new(&config)
            .await
            .expect("Failed to connect to database");
        db.migrate().await.expect("Failed to apply schema");
        PgSessionStore::new(db.pool().clone(), Arc::new(SystemClock))
    }

    fn session(refresh_token: &str) -> Session {
        let now = Utc::now();
        Session {
            session_id: Uuid::new_v4(),
            user_id: rand::random::<u32>() as i64,
            email: "pg@example.com".to_string(),
            name: "Pg".to_string(),
            role: "student".to_string(),
            permissions: vec!["courses:read".to_string()],
            refresh_token_digest: digest_refresh_token(refresh_token),
            created_at: now,
            last_activity_at: now,
            access_ttl: Duration::hours(1),
            refresh_ttl: Duration::hours(24),
            refresh_expires_at: now + Duration::hours(24),
            remember_me: false,
        }
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a live PostgreSQL"]
    async fn test_pg_rotation_and_replay() {
        let store = setup_store().await;
        let first = Uuid::new_v4().simple().to_string();
        let second = Uuid::new_v4().simple().to_string();
        let s = session(&first);
        store.create(s.clone()).await.unwrap();

        store.rotate(&first, &second, Duration::hours(24)).await.unwrap();
        assert!(matches!(
            store.rotate(&first, "whatever", Duration::hours(24)).await,
            Err(AuthError::RefreshConflict)
        ));
        assert!(matches!(
            store.rotate("never-issued", "whatever", Duration::hours(24)).await,
            Err(AuthError::InvalidRefreshToken)
        ));

        let counts = store.delete(s.session_id).await.unwrap();
        assert_eq!(counts.sessions_cleared, 1);
        assert_eq!(counts.tokens_cleared, 2);
        assert!(store.delete(s.session_id).await.unwrap().is_zero());
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a live PostgreSQL"]
    async fn test_pg_health_check() {
        let store = setup_store().await;
        assert!(store.health_check().await);
    }
}
