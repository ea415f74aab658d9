//! Callback-based cookie store used by the request pipeline.
//!
//! Every operation completes through a callback that is always delivered on the I/O
//! thread, posted as a separate task. Callers never see a completion from inside their
//! own stack frame.

use crate::engine::cookies::{Cookie, CookieJarHandle, CookieStoreHandle};
use crate::engine::io_thread::IoThread;
use std::sync::{Arc, PoisonError};
use url::Url;

pub type CookieListCallback = Box<dyn FnOnce(Vec<Cookie>) + Send + 'static>;
pub type CookieHeaderCallback = Box<dyn FnOnce(Option<String>) + Send + 'static>;
pub type SetCookieCallback = Box<dyn FnOnce(bool) + Send + 'static>;
pub type DeleteCookiesCallback = Box<dyn FnOnce(usize) + Send + 'static>;
pub type FlushCallback = Box<dyn FnOnce() + Send + 'static>;

pub trait AsyncCookieStore: Send + Sync {
    /// Cookies that would be sent to `url`.
    fn get_cookie_list(&self, url: &Url, callback: CookieListCallback);

    /// `Cookie` header value for `url`, `None` when nothing matches.
    fn get_cookie_header(&self, url: &Url, callback: CookieHeaderCallback);

    /// Stores one `Set-Cookie` line received for `url`.
    fn set_cookie_line(&self, url: &Url, line: &str, callback: SetCookieCallback);

    /// Deletes cookies. `url` limits the deletion to cookies sent to that URL and `name`
    /// limits it further to cookies with that name. With neither, everything is deleted.
    fn delete_cookies(&self, url: Option<&Url>, name: Option<&str>, callback: DeleteCookiesCallback);

    fn all_cookies(&self, callback: CookieListCallback);

    fn flush(&self, callback: Option<FlushCallback>);
}

/// [`AsyncCookieStore`] over a synchronous [`CookieJar`](crate::engine::cookies::CookieJar).
pub struct JarCookieStore {
    io: Arc<IoThread>,
    jar: CookieJarHandle,
    /// Backing store flushed by [`AsyncCookieStore::flush`].
    store: Option<CookieStoreHandle>,
}

impl JarCookieStore {
    pub fn new(io: Arc<IoThread>, jar: CookieJarHandle, store: Option<CookieStoreHandle>) -> Self {
        Self { io, jar, store }
    }

    pub fn jar(&self) -> &CookieJarHandle {
        &self.jar
    }

    fn complete<T: Send + 'static>(&self, callback: impl FnOnce(T) + Send + 'static, value: T) {
        if !self.io.post(move || callback(value)) {
            log::warn!("dropping cookie store completion: I/O thread '{}' stopped", self.io.name());
        }
    }
}

impl AsyncCookieStore for JarCookieStore {
    fn get_cookie_list(&self, url: &Url, callback: CookieListCallback) {
        let cookies = self.jar.read().unwrap_or_else(PoisonError::into_inner).cookies_for_url(url);
        self.complete(callback, cookies);
    }

    fn get_cookie_header(&self, url: &Url, callback: CookieHeaderCallback) {
        let header = self.jar.read().unwrap_or_else(PoisonError::into_inner).get_request_cookies(url);
        self.complete(callback, header);
    }

    fn set_cookie_line(&self, url: &Url, line: &str, callback: SetCookieCallback) {
        let stored = self.jar.write().unwrap_or_else(PoisonError::into_inner).set_cookie_line(url, line);
        self.complete(callback, stored);
    }

    fn delete_cookies(&self, url: Option<&Url>, name: Option<&str>, callback: DeleteCookiesCallback) {
        let removed = {
            let mut jar = self.jar.write().unwrap_or_else(PoisonError::into_inner);
            match (url, name) {
                (Some(url), Some(name)) => jar.remove_cookie(url, name),
                (Some(url), None) => jar.remove_cookies_for_url(url),
                (None, None) => jar.clear(),
                (None, Some(name)) => jar.remove_cookies_named(name),
            }
        };
        self.complete(callback, removed);
    }

    fn all_cookies(&self, callback: CookieListCallback) {
        let cookies = self.jar.read().unwrap_or_else(PoisonError::into_inner).all_cookies();
        self.complete(callback, cookies);
    }

    fn flush(&self, callback: Option<FlushCallback>) {
        if let Some(store) = &self.store {
            store.persist_all();
        }
        if let Some(callback) = callback {
            self.complete(|()| callback(), ());
        }
    }
}
