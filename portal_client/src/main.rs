//! Command-line session client for the portal auth API.
//!
//! The session is kept in a JSON state file so that successive invocations
//! share it, the way a browser keeps local storage between page loads.

use anyhow::{Context, Result, bail};
use pico_args::Arguments;
use portal_auth::{CleanupScope, clock::SystemClock};
use portal_client::{
    ClientSessionCache,
    api_client::{AuthBackend, HttpAuthBackend},
    config::ClientConfig,
    cookies::CookieJar,
    storage::{FileStore, KeyValueStore, MemoryStore},
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

const HELP: &str = "\
Portal session client

USAGE:
  portal_client [OPTIONS] <COMMAND>

COMMANDS:
  login                 Log in and store the session
  token                 Print a valid access token, refreshing if needed
  refresh               Force a token refresh
  status                Show the stored session
  logout                Log out and purge local auth state
  purge                 Emergency cleanup of client and server state
  health                Check the server

OPTIONS:
  --server URL          Server URL  [default: http://localhost:8080]
  --email EMAIL         Email for login
  --password PASS       Password for login
  --remember            Keep the session for longer
  --state PATH          Session state file  [default: ~/.portal/session.json]

FLAGS:
  -h, --help            Print help information
";

struct Args {
    command: String,
    server_url: String,
    email: Option<String>,
    password: Option<String>,
    remember_me: bool,
    state_path: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::builder().format_target(false).init();

    let mut pargs = Arguments::from_env();

    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let args = Args {
        server_url: pargs
            .value_from_str("--server")
            .unwrap_or_else(|_| "http://localhost:8080".to_string()),
        email: pargs.opt_value_from_str("--email")?,
        password: pargs.opt_value_from_str("--password")?,
        remember_me: pargs.contains("--remember"),
        state_path: pargs
            .opt_value_from_str("--state")?
            .unwrap_or_else(default_state_path),
        command: pargs
            .free_from_str()
            .context("missing command, see --help")?,
    };

    run(args).await
}

fn default_state_path() -> PathBuf {
    let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("."), PathBuf::from);
    home.join(".portal").join("session.json")
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}: ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

async fn run(args: Args) -> Result<()> {
    let config = ClientConfig::from_env(args.server_url);
    let jar = Arc::new(CookieJar::new());
    let backend: Arc<dyn AuthBackend> = Arc::new(
        HttpAuthBackend::new(config.base_url.clone(), config.request_timeout)?
            .with_cookie_jar(jar.clone()),
    );
    let persistent: Arc<dyn KeyValueStore> = Arc::new(
        FileStore::open(&args.state_path)
            .await
            .with_context(|| format!("opening {}", args.state_path.display()))?,
    );
    let per_session: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());

    let cache = ClientSessionCache::new(
        config,
        backend.clone(),
        persistent,
        per_session,
        jar,
        Arc::new(SystemClock),
    );

    match args.command.as_str() {
        "login" => {
            let email = match args.email {
                Some(email) => email,
                None => prompt("Email")?,
            };
            let password = match args.password {
                Some(password) => password,
                None => prompt("Password")?,
            };
            let snapshot = cache.login(&email, &password, args.remember_me).await?;
            println!(
                "Logged in as {} ({}), session {}",
                snapshot.email, snapshot.role, snapshot.session_id
            );
        }
        "token" => {
            cache.restore().await?;
            match cache.get_current_access_token().await? {
                Some(token) => println!("{token}"),
                None => bail!("not logged in"),
            }
        }
        "refresh" => {
            if cache.restore().await?.is_none() {
                bail!("not logged in");
            }
            let result = cache.refresh().await?;
            println!("Refreshed, access token valid for {}s", result.expires_in);
        }
        "status" => match cache.load().await? {
            Some(snapshot) => {
                let state = cache.state(snapshot.session_id).await;
                println!("User:     {} <{}>", snapshot.name, snapshot.email);
                println!("Role:     {}", snapshot.role);
                println!("Session:  {}", snapshot.session_id);
                println!("State:    {state:?}");
                println!(
                    "Expires:  {}",
                    chrono::DateTime::from_timestamp(snapshot.expires_at, 0)
                        .map_or_else(|| snapshot.expires_at.to_string(), |t| t.to_rfc3339())
                );
            }
            None => println!("Not logged in"),
        },
        "logout" => {
            cache.restore().await?;
            let report = cache.logout().await?;
            println!(
                "Logged out: {} keys and {} cookies cleared",
                report.client.keys_cleared, report.client.cookies_cleared
            );
        }
        "purge" => {
            cache.restore().await?;
            let report = cache.emergency_cleanup(CleanupScope::Full).await?;
            println!(
                "Purged: {} keys and {} cookies cleared",
                report.client.keys_cleared, report.client.cookies_cleared
            );
            if let Some(e) = report.partial_failure() {
                eprintln!("{e}");
            }
        }
        "health" => {
            let healthy = backend.health().await.unwrap_or(false);
            println!("{}", if healthy { "healthy" } else { "unhealthy" });
            if !healthy {
                std::process::exit(1);
            }
        }
        other => bail!("unknown command '{other}', see --help"),
    }

    Ok(())
}
