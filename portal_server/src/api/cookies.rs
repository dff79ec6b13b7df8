//! Auth cookie parsing and `Set-Cookie` construction.

use crate::config::CookieConfig;
use axum::http::{HeaderMap, HeaderName, header};

/// Cookie name for the access token.
pub const ACCESS_COOKIE_NAME: &str = "access_token";

/// Cookie name for the refresh token.
pub const REFRESH_COOKIE_NAME: &str = "refresh_token";

/// Header pairs ready for `AppendHeaders`.
pub type SetCookies = Vec<(HeaderName, String)>;

/// Extract a cookie value from the Cookie header.
pub fn get_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    cookie_header.split(';').find_map(|part| {
        let (key, value) = part.trim().split_once('=')?;
        (key.trim() == name).then_some(value.trim())
    })
}

/// Cookies carrying a freshly minted pair. Empty when cookies are disabled.
pub fn session_cookies(
    config: &CookieConfig,
    access_token: &str,
    access_max_age: i64,
    refresh_token: &str,
    refresh_max_age: i64,
) -> SetCookies {
    if !config.enabled {
        return Vec::new();
    }
    let path = config.paths.first().map(String::as_str).unwrap_or("/");
    vec![
        (
            header::SET_COOKIE,
            cookie(config, ACCESS_COOKIE_NAME, access_token, path, access_max_age),
        ),
        (
            header::SET_COOKIE,
            cookie(config, REFRESH_COOKIE_NAME, refresh_token, path, refresh_max_age),
        ),
    ]
}

/// Expire both auth cookies under every configured path.
///
/// Emitted even when setting cookies is disabled, so that a stale cookie
/// from an earlier deployment still gets removed.
pub fn cleared_cookies(config: &CookieConfig) -> SetCookies {
    let mut headers = Vec::with_capacity(config.paths.len() * 2);
    for path in &config.paths {
        for name in [ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME] {
            headers.push((header::SET_COOKIE, cookie(config, name, "", path, 0)));
        }
    }
    headers
}

fn cookie(config: &CookieConfig, name: &str, value: &str, path: &str, max_age: i64) -> String {
    let secure = if config.secure { "; Secure" } else { "" };
    format!(
        "{}={}; HttpOnly; SameSite=Strict; Path={}; Max-Age={}{}",
        name,
        value,
        path,
        max_age.max(0),
        secure
    )
}
