//! Cookie jar abstraction and a simple in-memory implementation.
//!
//! A **cookie jar** represents all cookies belonging to a single zone. The request
//! pipeline hands it `Set-Cookie` lines one at a time and asks it which cookies go out
//! with a request.
//!
//! This module defines the [`CookieJar`] trait and a reference implementation,
//! [`DefaultCookieJar`], which stores cookies **in memory only** (no persistence).
//!
//! ## Notes & limitations
//! - `Max-Age`, priorities, size limits, eviction policies, and expiration enforcement
//!   are not implemented.
//! - Cookies are bucketed by **cookie domain** (the host for host-only cookies). Within a
//!   bucket, host/subdomain, path prefix and `Secure` checks are applied.
//! - This type is **not** internally synchronized. Use it via a
//!   `CookieJarHandle = Arc<RwLock<dyn CookieJar + Send + Sync>>`.
//!
//! See also: RFC 6265bis (HTTP State Management Mechanism).
use crate::engine::cookies::Cookie;
use http::header::SET_COOKIE;
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use url::Url;

/// A cookie jar keeps the cookies for one single zone.
///
/// ### Type erasure
/// `as_any` enables downcasting when callers need access to the concrete
/// implementation (e.g., for snapshotting/persistence).
pub trait CookieJar: Send + Sync {
    /// Returns a type-erased reference to the jar.
    fn as_any(&self) -> &dyn Any;

    /// Stores a single `Set-Cookie` line received for `url`.
    ///
    /// Returns false when the line is rejected. An existing cookie with the same
    /// name, domain and path is replaced.
    fn set_cookie_line(&mut self, url: &Url, line: &str) -> bool;

    /// Stores all `Set-Cookie` lines found in response `headers`, in order.
    fn store_response_cookies(&mut self, url: &Url, headers: &HeaderMap) {
        for line in headers.get_all(SET_COOKIE).iter().filter_map(|v| v.to_str().ok()) {
            self.set_cookie_line(url, line);
        }
    }

    /// Returns the cookies that would be sent with a request to `url`.
    fn cookies_for_url(&self, url: &Url) -> Vec<Cookie>;

    /// Returns the `Cookie` request header value to send for `url`, if any.
    fn get_request_cookies(&self, url: &Url) -> Option<String> {
        let header = self
            .cookies_for_url(url)
            .iter()
            .map(Cookie::pair)
            .collect::<Vec<_>>()
            .join("; ");
        if header.is_empty() {
            None
        } else {
            Some(header)
        }
    }

    /// Every cookie in the jar.
    fn all_cookies(&self) -> Vec<Cookie>;

    /// Removes all cookies from the jar and returns how many were removed.
    fn clear(&mut self) -> usize;

    /// Removes cookies named `cookie_name` that would be sent to `url`.
    fn remove_cookie(&mut self, url: &Url, cookie_name: &str) -> usize;

    /// Removes all cookies that would be sent to `url`.
    fn remove_cookies_for_url(&mut self, url: &Url) -> usize;

    /// Removes every cookie named `cookie_name`, whatever its scope.
    fn remove_cookies_named(&mut self, cookie_name: &str) -> usize;
}

/// Default cookie jar which holds cookies for a single zone.
///
/// This implementation is **in-memory only** and performs **no persistence**.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultCookieJar {
    /// Cookies bucketed by **cookie domain**.
    pub entries: HashMap<String, Vec<Cookie>>,
}

impl DefaultCookieJar {
    /// Creates an empty in-memory cookie jar.
    pub fn new() -> Self {
        DefaultCookieJar {
            entries: HashMap::new(),
        }
    }

    fn remove_where(&mut self, pred: impl Fn(&Cookie) -> bool) -> usize {
        let mut removed = 0;
        for bucket in self.entries.values_mut() {
            let before = bucket.len();
            bucket.retain(|c| !pred(c));
            removed += before - bucket.len();
        }
        self.entries.retain(|_, bucket| !bucket.is_empty());
        removed
    }
}

impl CookieJar for DefaultCookieJar {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn set_cookie_line(&mut self, url: &Url, line: &str) -> bool {
        let Some(cookie) = Cookie::parse(line, url) else {
            return false;
        };
        let key = cookie.domain.clone().unwrap_or_default();
        let bucket = self.entries.entry(key).or_default();

        // Replace existing cookie with same name and scope
        if let Some(existing) = bucket
            .iter_mut()
            .find(|c| c.name == cookie.name && c.path == cookie.path && c.host_only == cookie.host_only)
        {
            *existing = cookie;
        } else {
            bucket.push(cookie);
        }
        true
    }

    fn cookies_for_url(&self, url: &Url) -> Vec<Cookie> {
        let mut cookies: Vec<Cookie> = self
            .entries
            .values()
            .flatten()
            .filter(|c| c.matches(url))
            .cloned()
            .collect();

        // Longer paths first, as user agents conventionally do
        cookies.sort_by(|a, b| {
            let la = a.path.as_deref().map_or(0, str::len);
            let lb = b.path.as_deref().map_or(0, str::len);
            lb.cmp(&la)
        });
        cookies
    }

    fn all_cookies(&self) -> Vec<Cookie> {
        self.entries.values().flatten().cloned().collect()
    }

    fn clear(&mut self) -> usize {
        let n = self.entries.values().map(Vec::len).sum();
        self.entries.clear();
        n
    }

    fn remove_cookie(&mut self, url: &Url, cookie_name: &str) -> usize {
        self.remove_where(|c| c.name == cookie_name && c.matches(url))
    }

    fn remove_cookies_for_url(&mut self, url: &Url) -> usize {
        self.remove_where(|c| c.matches(url))
    }

    fn remove_cookies_named(&mut self, cookie_name: &str) -> usize {
        self.remove_where(|c| c.name == cookie_name)
    }
}
