//! Authentication manager implementation.

use super::{
    config::TokenConfig,
    errors::{AuthError, AuthResult},
    models::{
        ACCESS_TOKEN_TYPE, AccessTokenClaims, Credential, LoginResult, LogoutTarget,
        RefreshResult, UserId,
    },
};
use crate::{
    clock::Clock,
    db::{UserDirectory, with_store_timeout},
    session::{
        ProfileUpdate, PurgeCounts, PurgeFilter, RefreshLookup, Session, SessionInfo,
        SessionStore, digest_refresh_token,
    },
};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{DateTime, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use rand::RngCore;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// Token issuer: verifies credentials, mints token pairs and validates
/// access tokens against the injected session store and clock.
#[derive(Clone)]
pub struct AuthManager {
    directory: Arc<dyn UserDirectory>,
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    config: TokenConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl AuthManager {
    /// Create a new authentication manager
    ///
    /// # Arguments
    ///
    /// * `directory` - User directory consulted at login
    /// * `store` - Shared session store
    /// * `clock` - Time source for `iat`/`exp` and expiry checks
    /// * `config` - Signing secret, pepper and token lifetimes
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        config: TokenConfig,
    ) -> Self {
        let encoding_key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
        Self {
            directory,
            store,
            clock,
            config,
            encoding_key,
            decoding_key,
        }
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Login a user
    ///
    /// Creates a new session in the store and returns its token pair.
    ///
    /// # Errors
    ///
    /// * `AuthError::MissingCredentials` - email or password blank
    /// * `AuthError::InvalidCredentials` - unknown email, wrong password or inactive account
    /// * `AuthError::BackendUnreachable` - directory or store did not answer in time
    pub async fn login(&self, credential: Credential) -> AuthResult<LoginResult> {
        let email = credential.email.trim();
        if email.is_empty() || credential.password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let user = self
            .bounded(self.directory.find_by_email(email))
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        self.verify_password(&credential.password, &user.password_hash)?;
        if !user.is_active {
            return Err(AuthError::InvalidCredentials);
        }

        let now = self.clock.now();
        let (access_ttl, refresh_ttl) = self.config.ttls(credential.remember_me);
        let refresh_token = generate_refresh_token();

        let session = Session {
            session_id: Uuid::new_v4(),
            user_id: user.id,
            email: user.email,
            name: user.name,
            role: user.role,
            permissions: user.permissions,
            refresh_token_digest: digest_refresh_token(&refresh_token),
            created_at: now,
            last_activity_at: now,
            access_ttl,
            refresh_ttl,
            refresh_expires_at: now + refresh_ttl,
            remember_me: credential.remember_me,
        };

        self.bounded(self.store.create(session.clone())).await?;
        let (access_token, expires_in) = self.mint_access_token(&session, now)?;

        log::info!(
            "Session {} created for user {} (remember_me: {})",
            session.session_id,
            session.user_id,
            session.remember_me
        );

        Ok(LoginResult {
            access_token,
            refresh_token,
            refresh_expires_in: (session.refresh_expires_at - now).num_seconds(),
            session,
            expires_in,
        })
    }

    /// Verify an access token
    ///
    /// Signature and token type are checked by `jsonwebtoken`; `exp` is
    /// compared against the injected clock with zero leeway.
    ///
    /// # Errors
    ///
    /// * `AuthError::InvalidToken` - malformed, bad signature or not an access token
    /// * `AuthError::ExpiredToken` - `exp` is not in the future
    pub fn validate(&self, token: &str) -> AuthResult<AccessTokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = false;

        let claims = decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                _ => AuthError::InvalidToken,
            })?
            .claims;

        if claims.typ != ACCESS_TOKEN_TYPE {
            return Err(AuthError::InvalidToken);
        }
        if self.clock.now().timestamp() >= claims.exp {
            return Err(AuthError::ExpiredToken);
        }
        Ok(claims)
    }

    /// Exchange a refresh token for a new pair, rotating the session.
    ///
    /// # Errors
    ///
    /// * `AuthError::InvalidRefreshToken` - unknown, tampered or expired token;
    ///   the store is not modified
    /// * `AuthError::RefreshConflict` - the token was already rotated, or a
    ///   concurrent rotation won
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<RefreshResult> {
        if refresh_token.trim().is_empty() {
            return Err(AuthError::InvalidRefreshToken);
        }

        let current = match self
            .bounded(self.store.resolve_refresh_token(refresh_token))
            .await?
        {
            RefreshLookup::Current(session) => session,
            RefreshLookup::Retired { session_id } => {
                log::warn!("Replay of rotated refresh token for session {session_id}");
                return Err(AuthError::RefreshConflict);
            }
            RefreshLookup::Unknown => return Err(AuthError::InvalidRefreshToken),
        };

        let successor = generate_refresh_token();
        let session = self
            .bounded(
                self.store
                    .rotate(refresh_token, &successor, current.refresh_ttl),
            )
            .await?;

        let now = self.clock.now();
        let (access_token, expires_in) = self.mint_access_token(&session, now)?;
        log::debug!("Session {} rotated", session.session_id);

        Ok(RefreshResult {
            access_token,
            refresh_token: successor,
            session_id: session.session_id,
            expires_in,
            refresh_expires_in: (session.refresh_expires_at - now).num_seconds(),
        })
    }

    /// Invalidate one session, located by id or by refresh token.
    ///
    /// Returns the purge counts; an unknown target yields zero counts.
    pub async fn logout(&self, target: &LogoutTarget) -> AuthResult<PurgeCounts> {
        let session_id = match (target.session_id, &target.refresh_token) {
            (Some(id), _) => Some(id),
            (None, Some(token)) => match self
                .bounded(self.store.resolve_refresh_token(token))
                .await?
            {
                RefreshLookup::Current(session) => Some(session.session_id),
                RefreshLookup::Retired { session_id } => Some(session_id),
                RefreshLookup::Unknown => None,
            },
            (None, None) => None,
        };

        let Some(session_id) = session_id else {
            return Ok(PurgeCounts::default());
        };
        let counts = self.bounded(self.store.delete(session_id)).await?;
        if counts.sessions_cleared > 0 {
            log::info!("Session {session_id} logged out");
        }
        Ok(counts)
    }

    /// Invalidate every session of a user.
    pub async fn logout_all(&self, user_id: UserId) -> AuthResult<PurgeCounts> {
        let counts = self
            .bounded(self.store.purge(&PurgeFilter::user(user_id)))
            .await?;
        log::info!(
            "Logged out {} session(s) of user {user_id}",
            counts.sessions_cleared
        );
        Ok(counts)
    }

    pub async fn session(&self, session_id: Uuid) -> AuthResult<Option<Session>> {
        self.bounded(self.store.get(session_id)).await
    }

    pub async fn list_sessions(&self, user_id: UserId) -> AuthResult<Vec<SessionInfo>> {
        let sessions = self.bounded(self.store.list_for_user(user_id)).await?;
        Ok(sessions.iter().map(Session::info).collect())
    }

    /// Record activity on a session.
    pub async fn touch(&self, session_id: Uuid) -> AuthResult<bool> {
        self.bounded(self.store.touch(session_id)).await
    }

    /// Push a rename or permission change into the user's live sessions.
    ///
    /// Access tokens already minted keep their old claims until they expire.
    pub async fn apply_profile_update(
        &self,
        user_id: UserId,
        update: &ProfileUpdate,
    ) -> AuthResult<u64> {
        if update.is_empty() {
            return Ok(0);
        }
        self.bounded(self.store.update_profile(user_id, update))
            .await
    }

    /// Hash password with Argon2id + pepper
    pub fn hash_password(&self, password: &str) -> AuthResult<String> {
        let peppered = format!("{}{}", password, self.config.pepper);
        let salt = SaltString::generate(&mut OsRng);
        Ok(Argon2::default()
            .hash_password(peppered.as_bytes(), &salt)
            .map_err(|_| AuthError::HashingFailed)?
            .to_string())
    }

    /// Verify password against hash
    pub fn verify_password(&self, password: &str, hash: &str) -> AuthResult<()> {
        let peppered = format!("{}{}", password, self.config.pepper);
        let parsed_hash = PasswordHash::new(hash).map_err(|_| AuthError::InvalidCredentials)?;
        Argon2::default()
            .verify_password(peppered.as_bytes(), &parsed_hash)
            .map_err(|_| AuthError::InvalidCredentials)
    }

    fn mint_access_token(&self, session: &Session, now: DateTime<Utc>) -> AuthResult<(String, i64)> {
        let exp = (now + session.access_ttl).min(session.refresh_expires_at);
        let claims = AccessTokenClaims {
            user_id: session.user_id,
            session_id: session.session_id,
            role: session.role.clone(),
            permissions: session.permissions.clone(),
            typ: ACCESS_TOKEN_TYPE.to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        Ok((token, claims.exp - claims.iat))
    }

    async fn bounded<T, F>(&self, future: F) -> AuthResult<T>
    where
        F: Future<Output = AuthResult<T>>,
    {
        with_store_timeout(self.config.store_timeout, future).await
    }
}

/// 32 random bytes, hex encoded.
fn generate_refresh_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
