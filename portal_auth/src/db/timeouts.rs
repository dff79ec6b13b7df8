//! Bounded store calls.
//!
//! Every session store or directory call made on behalf of a request goes
//! through [`with_store_timeout`]; a call that outlives its deadline becomes
//! `AuthError::BackendUnreachable` instead of hanging the request.

use crate::auth::{AuthError, AuthResult};
use std::time::Duration;
use tokio::time::timeout;

/// Run `future` with an upper bound of `duration`.
///
/// # Errors
///
/// * `AuthError::BackendUnreachable` - the deadline passed first, or the
///   pool could not reach the database
///
/// Any other error from `future` is returned unchanged.
pub async fn with_store_timeout<F, T>(duration: Duration, future: F) -> AuthResult<T>
where
    F: std::future::Future<Output = AuthResult<T>>,
{
    match timeout(duration, future).await {
        Ok(Err(AuthError::Database(e))) if is_connectivity_error(&e) => {
            Err(AuthError::BackendUnreachable(e.to_string()))
        }
        Ok(result) => result,
        Err(_) => Err(AuthError::BackendUnreachable(format!(
            "session store timed out after {duration:?}"
        ))),
    }
}

fn is_connectivity_error(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
    )
}
