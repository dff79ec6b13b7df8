//! Client runtime for portal authentication.
//!
//! [`cache::ClientSessionCache`] is the entry point: it logs in, persists the
//! session, hands out access tokens and refreshes them through the
//! [`refresh::RefreshCoordinator`]. [`redirect::RedirectLoopGuard`] vetoes
//! navigation loops and [`cleanup::ClientCleanup`] purges local auth state.

pub mod api_client;
pub mod cache;
pub mod cleanup;
pub mod config;
pub mod cookies;
pub mod error;
pub mod redirect;
pub mod refresh;
pub mod retry;
pub mod storage;

pub use cache::{ClientSessionCache, ClientSessionSnapshot};
pub use error::{ClientError, ClientResult};
