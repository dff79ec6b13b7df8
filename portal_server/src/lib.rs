//! HTTP surface for the portal session and token lifecycle.
//!
//! The router in [`api`] is a thin layer over [`portal_auth`]: handlers hold
//! an `Arc<AuthManager>` and a `ServerCleanup` and never touch a store
//! directly.

pub mod api;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod sweeper;
