//! Portal auth server.
//!
//! Serves the auth API over a shared session store and runs the periodic
//! expiry sweep.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Error};
use pico_args::Arguments;
use portal_auth::{
    AuthManager,
    cleanup::{AnomalyMonitor, MemoryAuditLog, ServerCleanup},
    clock::{Clock, SystemClock},
    db::{Database, MemoryUserDirectory, PgUserDirectory, UserDirectory, UserRecord},
    session::{MemorySessionStore, PgSessionStore, SessionStore},
};
use portal_server::{
    api::{self, rate_limiter::LoginRateLimiter},
    config::{ServerConfig, StoreBackend},
    logging, metrics, sweeper,
};
use tracing::info;

const HELP: &str = "\
Run the portal auth server

USAGE:
  portal_server [OPTIONS]

OPTIONS:
  --bind       IP:PORT     Server socket bind address  [default: env SERVER_BIND or 127.0.0.1:8080]
  --db-url     URL         Database connection string; selects the postgres store

FLAGS:
  -h, --help               Print help information

ENVIRONMENT:
  SERVER_BIND              Server bind address (e.g., 0.0.0.0:8080)
  SESSION_STORE            memory | postgres  [default: memory]
  DATABASE_URL             PostgreSQL connection string
  JWT_SECRET               JWT signing secret (at least 32 characters)
  PASSWORD_PEPPER          Password hashing pepper (at least 16 characters)
  DEV_USERS                email:password:role[:name],... seeded into the memory directory
  METRICS_BIND             Prometheus exporter address
  (See .env.example for all configuration options)
";

const AUDIT_LOG_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let bind: Option<SocketAddr> = pargs.opt_value_from_str("--bind")?;
    let database_url: Option<String> = pargs.opt_value_from_str("--db-url")?;

    logging::init();

    let config = ServerConfig::from_env(bind, database_url)?;
    config.validate()?;

    if let Some(addr) = config.metrics_bind {
        metrics::init_metrics(addr).map_err(Error::msg)?;
        info!("Prometheus metrics exported on {}", addr);
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut seed_target = None;
    let (directory, store): (Arc<dyn UserDirectory>, Arc<dyn SessionStore>) = match &config.store
    {
        StoreBackend::Memory => {
            info!("Using in-memory session store");
            let directory = Arc::new(MemoryUserDirectory::new());
            seed_target = Some(directory.clone());
            let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new(clock.clone()));
            (directory as Arc<dyn UserDirectory>, store)
        }
        StoreBackend::Postgres(db_config) => {
            info!("Connecting to database");
            let db = Database::new(db_config)
                .await
                .context("Failed to connect to database")?;
            db.migrate().await.context("Failed to apply session schema")?;
            info!("Database connected successfully");
            let directory: Arc<dyn UserDirectory> =
                Arc::new(PgUserDirectory::new(db.pool().clone()));
            let store: Arc<dyn SessionStore> =
                Arc::new(PgSessionStore::new(db.pool().clone(), clock.clone()));
            (directory, store)
        }
    };

    let auth_manager = Arc::new(AuthManager::new(
        directory,
        store.clone(),
        clock.clone(),
        config.token_config(),
    ));
    if let Some(directory) = seed_target {
        seed_dev_users(&config, &auth_manager, &directory).await?;
    }
    let cleanup = ServerCleanup::new(
        store.clone(),
        Arc::new(MemoryAuditLog::new(AUDIT_LOG_CAPACITY)),
        clock,
    );
    let login_limiter = Arc::new(LoginRateLimiter::new(
        config.rate_limit.max_attempts,
        Duration::from_secs(config.rate_limit.window_secs),
    ));

    let sweeper = sweeper::spawn_sweeper(
        AnomalyMonitor::new(store, cleanup.clone(), config.sweeper.thresholds),
        login_limiter.clone(),
        Duration::from_secs(config.sweeper.interval_secs),
    );

    let state = api::AppState {
        auth_manager,
        cleanup,
        login_limiter,
        cookies: Arc::new(config.cookies.clone()),
    };
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;

    info!(
        "Server is running at http://{}. Press Ctrl+C to stop.",
        config.bind
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    sweeper.abort();
    info!("Shutting down server...");

    Ok(())
}

/// Hash and insert `DEV_USERS` into the in-memory directory.
async fn seed_dev_users(
    config: &ServerConfig,
    auth_manager: &AuthManager,
    directory: &MemoryUserDirectory,
) -> Result<(), Error> {
    for (index, user) in config.dev_users.iter().enumerate() {
        let hash = auth_manager.hash_password(&user.password)?;
        directory
            .insert(UserRecord::new(
                index as i64 + 1,
                user.email.clone(),
                user.name.clone(),
                user.role.clone(),
                hash,
            ))
            .await;
    }
    if !config.dev_users.is_empty() {
        info!("Seeded {} development user(s)", config.dev_users.len());
    }
    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install CTRL+C signal handler: {}", e);
    }
}
