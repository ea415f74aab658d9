//! Network configuration.
//!
//! `NetConfig` controls the shared network primitives of a
//! [`NetworkService`](crate::engine::NetworkService): the identity headers that are
//! added to outgoing requests, the name of the designated I/O thread, the chunk size
//! used when pulling response bodies and where global cookies are persisted.
//!
//! `NetConfig` provides sensible defaults via [`Default`] and a fluent
//! [`NetConfig::builder()`] for customization with validation.
//!
//! # Examples
//!
//! ## Use defaults
//! ```rust
//! use gosub_net::engine::NetConfig;
//! let cfg = NetConfig::default();
//! assert_eq!(cfg.read_buffer_size, 32 * 1024);
//! ```
//!
//! ## Customize with the builder
//! ```rust
//! use gosub_net::engine::NetConfig;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = NetConfig::builder()
//!     .user_agent("Gosub/0.1")
//!     .accept_languages("en-US,en;q=0.9,nl;q=0.8")
//!     .read_buffer_size(4096)
//!     .standard_scheme("widget")
//!     .build()?; // returns Result<NetConfig, NetConfigError>
//! # Ok(()) }
//! ```
//!
//! # Errors
//!
//! Builder validation can return [`NetConfigError`] if values are invalid
//! (e.g. an empty user agent, `read_buffer_size == 0` or a custom standard scheme
//! that is not a valid scheme name).

use std::fmt;
use std::path::PathBuf;

const DEFAULT_USER_AGENT: &str = "Gosub/1.0 (X11; Linux x86_64) Gecko/20250802 GosubBrowser/1.0";
const DEFAULT_IO_THREAD_NAME: &str = "gosub-net-io";
const DEFAULT_READ_BUFFER_SIZE: usize = 32 * 1024;
const MAX_READ_BUFFER_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct NetConfig {
    /// User agent sent when a request does not carry its own.
    pub user_agent: String,
    /// `Accept-Language` value sent when a request does not carry its own.
    pub accept_languages: Option<String>,
    /// Name of the designated I/O thread.
    pub io_thread_name: String,
    /// Size of the buffer offered to handlers on each body read.
    pub read_buffer_size: usize,
    /// JSON file backing the global cookie store. In-memory when `None`.
    pub cookie_store_path: Option<PathBuf>,
    /// Custom schemes that follow `scheme://host/path` syntax.
    pub standard_schemes: Vec<String>,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_languages: None,
            io_thread_name: DEFAULT_IO_THREAD_NAME.to_string(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            cookie_store_path: None,
            standard_schemes: Vec::new(),
        }
    }
}

impl NetConfig {
    pub fn builder() -> NetConfigBuilder {
        NetConfigBuilder::default()
    }

    /// Checks a config that was built by hand rather than through the builder.
    pub fn validate(&self) -> Result<(), NetConfigError> {
        validate(self)
    }

    /// Headers that are copied into request snapshots when the request lacks them.
    pub fn request_defaults(&self) -> RequestDefaults {
        RequestDefaults {
            user_agent: Some(self.user_agent.clone()),
            accept_language: self.accept_languages.clone(),
        }
    }
}

/// Identity headers applied to requests that do not declare them.
#[derive(Debug, Clone, Default)]
pub struct RequestDefaults {
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
}

/// Builder for [`NetConfig`], mirroring `ZoneConfigBuilder`.
#[derive(Debug, Clone, Default)]
pub struct NetConfigBuilder {
    inner: NetConfig,
}

impl NetConfigBuilder {
    #[inline]
    fn map(mut self, f: impl FnOnce(&mut NetConfig)) -> Self {
        f(&mut self.inner);
        self
    }

    pub fn user_agent<S: Into<String>>(self, ua: S) -> Self { self.map(|c| c.user_agent = ua.into()) }
    pub fn accept_languages<S: Into<String>>(self, langs: S) -> Self { self.map(|c| c.accept_languages = Some(langs.into())) }
    pub fn io_thread_name<S: Into<String>>(self, name: S) -> Self { self.map(|c| c.io_thread_name = name.into()) }
    pub fn read_buffer_size(self, bytes: usize) -> Self { self.map(|c| c.read_buffer_size = bytes) }
    pub fn cookie_store_path<P: Into<PathBuf>>(self, path: P) -> Self { self.map(|c| c.cookie_store_path = Some(path.into())) }
    pub fn standard_scheme<S: Into<String>>(self, scheme: S) -> Self { self.map(|c| c.standard_schemes.push(scheme.into())) }

    /// Apply multiple changes in one go.
    pub fn with(self, f: impl FnOnce(&mut NetConfig)) -> Self { self.map(f) }

    /// Validate and build the final config.
    pub fn build(self) -> Result<NetConfig, NetConfigError> {
        validate(&self.inner)?;
        Ok(self.inner)
    }
}

// ---------- Validation ----------

#[derive(Debug, Clone, PartialEq)]
pub enum NetConfigError {
    EmptyUserAgent,
    EmptyThreadName,
    InvalidReadBufferSize(usize),
    InvalidScheme(String),
}

impl fmt::Display for NetConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetConfigError::EmptyUserAgent =>
                write!(f, "user_agent must not be empty"),
            NetConfigError::EmptyThreadName =>
                write!(f, "io_thread_name must not be empty"),
            NetConfigError::InvalidReadBufferSize(n) =>
                write!(f, "read_buffer_size {n} is out of range (expected 1..={MAX_READ_BUFFER_SIZE})"),
            NetConfigError::InvalidScheme(s) =>
                write!(f, "'{s}' is not a valid scheme name"),
        }
    }
}
impl std::error::Error for NetConfigError {}

/// Returns true when `scheme` is a syntactically valid URL scheme (RFC 3986 section 3.1).
pub(crate) fn is_valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn validate(c: &NetConfig) -> Result<(), NetConfigError> {
    if c.user_agent.trim().is_empty() {
        return Err(NetConfigError::EmptyUserAgent);
    }
    if c.io_thread_name.trim().is_empty() {
        return Err(NetConfigError::EmptyThreadName);
    }
    if !(1..=MAX_READ_BUFFER_SIZE).contains(&c.read_buffer_size) {
        return Err(NetConfigError::InvalidReadBufferSize(c.read_buffer_size));
    }
    if let Some(bad) = c.standard_schemes.iter().find(|s| !is_valid_scheme(s)) {
        return Err(NetConfigError::InvalidScheme(bad.clone()));
    }
    Ok(())
}
