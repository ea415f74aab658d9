//! Cookie core types.
//!
//! This module defines the **type-erased handles** used by the cookie layer and the
//! serializable [`Cookie`] data structure.
//!
//! # Concurrency model
//! - [`CookieJarHandle`] is `Arc<RwLock<dyn CookieJar + Send + Sync>>`.
//!   - Callers take a **read lock** for non-mutating operations and a **write lock**
//!     for mutating operations on the underlying jar.
//! - [`CookieStoreHandle`] is `Arc<dyn CookieStore + Send + Sync>`.
//!   - Stores manage their **own internal synchronization**. The trait methods take `&self`.
//!
//! The [`Cookie`] struct is used for persistence/inspection and can be (de)serialized
//! via `serde` to JSON.
//!
//! ```rust
//! use gosub_net::engine::cookies::Cookie;
//! use url::Url;
//!
//! let url = Url::parse("https://www.example.com/account/login").unwrap();
//! let c = Cookie::parse("session=abc123; Domain=example.com; Secure; HttpOnly", &url).unwrap();
//! assert_eq!(c.domain.as_deref(), Some("example.com"));
//! assert_eq!(c.path.as_deref(), Some("/account"));
//! assert!(c.matches(&Url::parse("https://shop.example.com/account/cart").unwrap()));
//! ```

use crate::engine::cookies::store::CookieStore;
use crate::engine::cookies::CookieJar;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use url::Url;

/// A handle to a cookie jar trait.
///
/// This is a reference-counted, read/write-locked pointer to a type-erased
/// [`CookieJar`]. Obtain a **read lock** for queries and a **write lock** for
/// mutations.
pub type CookieJarHandle = Arc<RwLock<dyn CookieJar + Send + Sync>>;

/// A handle to a cookie store trait.
///
/// Store implementations must be **`Send + Sync` and internally synchronized**,
/// since callers hold only `&self` when invoking trait methods.
pub type CookieStoreHandle = Arc<dyn CookieStore + Send + Sync>;

/// A cookie as stored/serialized by the network layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    /// Cookie name (case-sensitive).
    pub name: String,

    /// Raw cookie value (not URL-decoded).
    pub value: String,

    /// Path scoping (e.g., `"/"`). Defaults to the directory of the request path.
    pub path: Option<String>,

    /// Domain scoping. For host-only cookies this is the host that set the cookie.
    pub domain: Option<String>,

    /// When `true`, `domain` must equal the request host exactly.
    #[serde(default)]
    pub host_only: bool,

    /// If `true`, cookie is sent only over HTTPS.
    pub secure: bool,

    /// Expiration timestamp, if any. Stored as received; not enforced.
    pub expires: Option<String>,

    /// SameSite policy (`"Strict"`, `"Lax"`, or `"None"`).
    pub same_site: Option<String>,

    /// If `true`, cookie is blocked from access by client-side scripts.
    pub http_only: bool,
}

impl Cookie {
    /// Parses one `Set-Cookie` line received for `url`.
    ///
    /// Returns `None` for lines without a `name=value` pair and for lines whose
    /// `Domain` attribute does not domain-match the host of `url`.
    pub fn parse(line: &str, url: &Url) -> Option<Cookie> {
        let host = url.host_str()?.to_ascii_lowercase();
        let mut parts = line.split(';');

        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let mut cookie = Cookie {
            name: name.to_string(),
            value: value.trim().to_string(),
            path: None,
            domain: None,
            host_only: true,
            secure: false,
            expires: None,
            same_site: None,
            http_only: false,
        };

        for part in parts {
            let part = part.trim();
            if let Some((k, v)) = part.split_once('=') {
                let v = v.trim();
                match k.trim().to_ascii_lowercase().as_str() {
                    "path" if v.starts_with('/') => cookie.path = Some(v.to_string()),
                    "domain" => {
                        let domain = v.trim_start_matches('.').to_ascii_lowercase();
                        if !domain.is_empty() {
                            cookie.domain = Some(domain);
                            cookie.host_only = false;
                        }
                    }
                    "expires" => cookie.expires = Some(v.to_string()),
                    "samesite" => cookie.same_site = Some(normalize_same_site(v)),
                    _ => {}
                }
            } else if part.eq_ignore_ascii_case("secure") {
                cookie.secure = true;
            } else if part.eq_ignore_ascii_case("httponly") {
                cookie.http_only = true;
            }
        }

        match &cookie.domain {
            Some(domain) if !domain_matches(&host, domain) => {
                log::debug!("rejecting cookie '{}': domain {} does not match {}", cookie.name, domain, host);
                return None;
            }
            Some(_) => {}
            None => cookie.domain = Some(host),
        }

        if cookie.path.is_none() {
            cookie.path = Some(default_path(url).to_string());
        }

        Some(cookie)
    }

    /// Serializes the cookie back into a `Set-Cookie` line.
    pub fn to_set_cookie_line(&self) -> String {
        let mut line = format!("{}={}", self.name, self.value);
        if let Some(path) = &self.path {
            line.push_str("; Path=");
            line.push_str(path);
        }
        if let (Some(domain), false) = (&self.domain, self.host_only) {
            line.push_str("; Domain=");
            line.push_str(domain);
        }
        if let Some(expires) = &self.expires {
            line.push_str("; Expires=");
            line.push_str(expires);
        }
        if let Some(same_site) = &self.same_site {
            line.push_str("; SameSite=");
            line.push_str(same_site);
        }
        if self.secure {
            line.push_str("; Secure");
        }
        if self.http_only {
            line.push_str("; HttpOnly");
        }
        line
    }

    /// Returns true when this cookie should be sent with a request to `url`.
    pub fn matches(&self, url: &Url) -> bool {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();

        let domain_ok = match &self.domain {
            Some(domain) if self.host_only => host == *domain,
            Some(domain) => domain_matches(&host, domain),
            None => true,
        };
        let path_ok = match &self.path {
            Some(cookie_path) => path_matches(url.path(), cookie_path),
            None => true,
        };
        let secure_ok = !self.secure || matches!(url.scheme(), "https" | "wss");

        domain_ok && path_ok && secure_ok
    }

    /// `name=value` pair as sent in a `Cookie` request header.
    pub fn pair(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

fn normalize_same_site(v: &str) -> String {
    if v.eq_ignore_ascii_case("lax") {
        "Lax".to_string()
    } else if v.eq_ignore_ascii_case("strict") {
        "Strict".to_string()
    } else if v.eq_ignore_ascii_case("none") {
        "None".to_string()
    } else {
        v.to_string()
    }
}

pub(crate) fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain || (host.len() > domain.len() && host.ends_with(domain) && host[..host.len() - domain.len()].ends_with('.'))
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/') || request_path[cookie_path.len()..].starts_with('/'))
}

fn default_path(url: &Url) -> &str {
    url.path()
        .rsplit_once('/')
        .map_or("/", |(a, _)| if a.is_empty() { "/" } else { a })
}
