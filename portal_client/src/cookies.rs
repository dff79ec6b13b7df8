//! Client-side cookie jar keyed by name, domain and path.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct CookieKey {
    name: String,
    domain: String,
    path: String,
}

#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: Mutex<BTreeMap<CookieKey, String>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    fn cookies(&self) -> MutexGuard<'_, BTreeMap<CookieKey, String>> {
        self.cookies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set(&self, name: &str, value: &str, domain: &str, path: &str) {
        self.cookies().insert(
            CookieKey {
                name: name.to_string(),
                domain: domain.to_string(),
                path: path.to_string(),
            },
            value.to_string(),
        );
    }

    /// First value stored under `name`, whatever its domain and path.
    pub fn get(&self, name: &str) -> Option<String> {
        self.cookies()
            .iter()
            .find(|(key, _)| key.name == name)
            .map(|(_, value)| value.clone())
    }

    /// Expire one exact cookie. Returns whether it existed.
    pub fn expire(&self, name: &str, domain: &str, path: &str) -> bool {
        self.cookies()
            .remove(&CookieKey {
                name: name.to_string(),
                domain: domain.to_string(),
                path: path.to_string(),
            })
            .is_some()
    }

    /// Distinct cookie names currently held.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.cookies().keys().map(|k| k.name.clone()).collect();
        names.dedup();
        names
    }

    pub fn len(&self) -> usize {
        self.cookies().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a `Set-Cookie` header received from `default_domain`.
    ///
    /// `Max-Age=0` removes the cookie.
    pub fn apply_set_cookie(&self, header: &str, default_domain: &str) {
        let mut parts = header.split(';').map(str::trim);
        let Some((name, value)) = parts.next().and_then(|p| p.split_once('=')) else {
            return;
        };

        let mut domain = default_domain.to_string();
        let mut path = "/".to_string();
        let mut expired = false;
        for attribute in parts {
            let (key, val) = attribute.split_once('=').unwrap_or((attribute, ""));
            match key.to_ascii_lowercase().as_str() {
                "domain" => domain = val.to_string(),
                "path" => path = val.to_string(),
                "max-age" => expired = val.trim() == "0",
                _ => {}
            }
        }

        if expired {
            self.expire(name.trim(), &domain, &path);
        } else {
            self.set(name.trim(), value.trim(), &domain, &path);
        }
    }
}
