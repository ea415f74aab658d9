//! Outgoing request model.
//!
//! A [`Request`] is a plain data carrier: URL, method, headers, an optional body and a
//! set of [`LoadFlags`]. Once a resource job has taken its snapshot of the request the
//! snapshot is marked read-only; mutations on a read-only request are ignored and logged.

use crate::engine::ids::{FrameId, TabId};
use bitflags::bitflags;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use url::Url;

bitflags! {
    /// Flags that alter how a request is loaded.
    pub struct LoadFlags: u32 {
        const NORMAL              = 0;
        /// Do not attach cookies to the request.
        const DO_NOT_SEND_COOKIES = 0b0001;
        /// Do not persist cookies set by the response.
        const DO_NOT_SAVE_COOKIES = 0b0010;
        /// Hint for handlers that keep their own cache.
        const BYPASS_CACHE        = 0b0100;
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    url: Url,
    method: Method,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
    load_flags: LoadFlags,
    first_party_for_cookies: Option<Url>,
    tab_id: Option<TabId>,
    frame_id: Option<FrameId>,
    read_only: bool,
}

impl Request {
    /// Creates a GET request for `url`.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            load_flags: LoadFlags::NORMAL,
            first_party_for_cookies: None,
            tab_id: None,
            frame_id: None,
            read_only: false,
        }
    }

    /// Parses `url` and creates a GET request for it.
    pub fn get(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(Url::parse(url)?))
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_load_flags(mut self, flags: LoadFlags) -> Self {
        self.load_flags = flags;
        self
    }

    pub fn with_first_party_for_cookies(mut self, url: Url) -> Self {
        self.first_party_for_cookies = Some(url);
        self
    }

    pub fn with_origin(mut self, tab_id: Option<TabId>, frame_id: Option<FrameId>) -> Self {
        self.tab_id = tab_id;
        self.frame_id = frame_id;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Lower-cased scheme of the request URL.
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header_str(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn load_flags(&self) -> LoadFlags {
        self.load_flags
    }

    pub fn first_party_for_cookies(&self) -> Option<&Url> {
        self.first_party_for_cookies.as_ref()
    }

    pub fn tab_id(&self) -> Option<TabId> {
        self.tab_id
    }

    pub fn frame_id(&self) -> Option<FrameId> {
        self.frame_id
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        if self.read_only {
            log::warn!("ignoring header '{}' on read-only request {}", name, self.url);
            return;
        }
        self.headers.insert(name, value);
    }

    pub fn remove_header(&mut self, name: &HeaderName) {
        if self.read_only {
            log::warn!("ignoring header removal '{}' on read-only request {}", name, self.url);
            return;
        }
        self.headers.remove(name);
    }

    pub fn set_load_flags(&mut self, flags: LoadFlags) {
        if self.read_only {
            log::warn!("ignoring load flags on read-only request {}", self.url);
            return;
        }
        self.load_flags = flags;
    }

    pub(crate) fn set_read_only(&mut self) {
        self.read_only = true;
    }
}
