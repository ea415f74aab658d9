//! Response models.
//!
//! Two types live here:
//!
//! - [`ResourceResponse`]: the response *head* a [`ResourceHandler`] fills in when its
//!   headers become available (status, status text, MIME type, headers and an optional
//!   error code). The job marks it read-only once the handler is done with it.
//! - [`Response`]: the **fully buffered** result a request resolves to. It contains the
//!   request URL, status code + reason, MIME type, headers, the raw body bytes and, for a
//!   redirect, the redirect target (redirects are reported, not followed).
//!
//! ## Notes
//! - The body is stored as raw `Vec<u8>`. For text responses, convert with
//!   `String::from_utf8_lossy(&resp.body)` or similar.
//! - `headers` is an `http::HeaderMap`, which is **case-insensitive** for
//!   header names.
//!
//! [`ResourceHandler`]: crate::engine::resource::ResourceHandler

use crate::net::status::NetError;
use http::header::{HeaderName, HeaderValue, LOCATION, SET_COOKIE};
use http::HeaderMap;

/// Response head built by a resource handler.
#[derive(Debug, Clone)]
pub struct ResourceResponse {
    status: u16,
    status_text: String,
    mime_type: Option<String>,
    headers: HeaderMap,
    error: Option<NetError>,
    read_only: bool,
}

impl Default for ResourceResponse {
    fn default() -> Self {
        Self {
            status: 200,
            status_text: "OK".to_string(),
            mime_type: None,
            headers: HeaderMap::new(),
            error: None,
            read_only: false,
        }
    }
}

impl ResourceResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header_str(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn error(&self) -> Option<NetError> {
        self.error
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn set_status(&mut self, status: u16) {
        if self.check_writable("status") {
            self.status = status;
        }
    }

    pub fn set_status_text<S: Into<String>>(&mut self, text: S) {
        if self.check_writable("status text") {
            self.status_text = text.into();
        }
    }

    pub fn set_mime_type<S: Into<String>>(&mut self, mime: S) {
        if self.check_writable("mime type") {
            self.mime_type = Some(mime.into());
        }
    }

    /// Replaces any existing values of `name`.
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        if self.check_writable("header") {
            self.headers.insert(name, value);
        }
    }

    /// Adds a value for `name`, keeping existing ones (e.g. multiple `Set-Cookie` lines).
    pub fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
        if self.check_writable("header") {
            self.headers.append(name, value);
        }
    }

    pub fn set_headers(&mut self, headers: HeaderMap) {
        if self.check_writable("headers") {
            self.headers = headers;
        }
    }

    /// Reports an error for the request. Errors that map onto a canceled or failed
    /// status end the request as soon as the headers are processed.
    pub fn set_error(&mut self, error: NetError) {
        if self.check_writable("error") {
            self.error = Some(error);
        }
    }

    /// All `Set-Cookie` lines, in the order they were added.
    pub fn set_cookie_lines(&self) -> Vec<String> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect()
    }

    pub fn location(&self) -> Option<&str> {
        self.header_str(&LOCATION)
    }

    pub(crate) fn set_read_only(&mut self) {
        self.read_only = true;
    }

    fn check_writable(&self, what: &str) -> bool {
        if self.read_only {
            log::warn!("ignoring {} change on read-only response", what);
        }
        !self.read_only
    }
}

/// Simple structure for completed responses.
#[derive(Debug)]
pub struct Response {
    /// URL of the request.
    pub url: url::Url,

    /// Numeric HTTP status code (e.g., `200`, `404`).
    pub status: u16,

    /// Human-readable reason phrase (e.g., `"OK"`, `"Not Found"`).
    pub status_text: String,

    /// MIME type reported by the handler or inferred from the URL.
    pub mime_type: Option<String>,

    /// Response headers as a case-insensitive map.
    pub headers: HeaderMap,

    /// Redirect target when the response is a redirect.
    pub redirect: Option<url::Url>,

    /// Raw response body bytes.
    pub body: Vec<u8>,

    /// Body bytes the job delivered. `None` when the body was never read, as for a redirect.
    pub content_length: Option<u64>,
}

impl Response {
    pub fn is_redirect(&self) -> bool {
        self.redirect.is_some()
    }

    /// Body decoded as UTF-8 (lossy).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
