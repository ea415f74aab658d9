//! Per-call cookie store resolution.
//!
//! A [`CookieStoreProxy`] never holds on to a concrete store. Each operation asks its
//! [`CookieStoreSource`] which store answers *this* call, because a request-scoped
//! handler may hand out a different cookie manager from one call to the next (or one
//! that is still initializing).

use crate::engine::context::RequestContextHandler;
use crate::engine::cookies::async_store::{
    AsyncCookieStore, CookieHeaderCallback, CookieListCallback, DeleteCookiesCallback, FlushCallback,
    SetCookieCallback,
};
use crate::engine::cookies::CookieManager;
use crate::engine::io_thread::IoThread;
use std::sync::Arc;
use url::Url;

/// Decides which cookie store backs a call.
pub trait CookieStoreSource: Send + Sync {
    /// The store to use right now. `None` means no store is available for this call.
    fn cookie_store(&self) -> Option<Arc<dyn AsyncCookieStore>>;
}

/// Always the parent context's store.
pub struct ParentCookieSource {
    parent: Arc<CookieManager>,
}

impl ParentCookieSource {
    pub fn new(parent: Arc<CookieManager>) -> Self {
        Self { parent }
    }
}

impl CookieStoreSource for ParentCookieSource {
    fn cookie_store(&self) -> Option<Arc<dyn AsyncCookieStore>> {
        self.parent.cookie_store().map(|s| s as Arc<dyn AsyncCookieStore>)
    }
}

/// The handler's cookie manager when it has one, the parent context's store otherwise.
pub struct HandlerCookieSource {
    handler: Arc<dyn RequestContextHandler>,
    parent: Arc<CookieManager>,
}

impl HandlerCookieSource {
    pub fn new(handler: Arc<dyn RequestContextHandler>, parent: Arc<CookieManager>) -> Self {
        Self { handler, parent }
    }
}

impl CookieStoreSource for HandlerCookieSource {
    fn cookie_store(&self) -> Option<Arc<dyn AsyncCookieStore>> {
        let manager = self.handler.cookie_manager().unwrap_or_else(|| self.parent.clone());
        // A manager that is still initializing has no store yet
        manager.cookie_store().map(|s| s as Arc<dyn AsyncCookieStore>)
    }
}

pub struct CookieStoreProxy {
    io: Arc<IoThread>,
    source: Box<dyn CookieStoreSource>,
}

impl CookieStoreProxy {
    pub fn new(io: Arc<IoThread>, source: Box<dyn CookieStoreSource>) -> Self {
        Self { io, source }
    }

    fn resolve(&self, op: &str) -> Option<Arc<dyn AsyncCookieStore>> {
        assert!(self.io.currently_on(), "CookieStoreProxy::{op} called off the I/O thread");
        let store = self.source.cookie_store();
        if store.is_none() {
            log::debug!("no cookie store available for {}; completing with defaults", op);
        }
        store
    }

    fn fail<T: Send + 'static>(&self, callback: impl FnOnce(T) + Send + 'static, value: T) {
        if !self.io.post(move || callback(value)) {
            log::warn!("dropping cookie completion: I/O thread '{}' stopped", self.io.name());
        }
    }
}

impl AsyncCookieStore for CookieStoreProxy {
    fn get_cookie_list(&self, url: &Url, callback: CookieListCallback) {
        match self.resolve("get_cookie_list") {
            Some(store) => store.get_cookie_list(url, callback),
            None => self.fail(callback, Vec::new()),
        }
    }

    fn get_cookie_header(&self, url: &Url, callback: CookieHeaderCallback) {
        match self.resolve("get_cookie_header") {
            Some(store) => store.get_cookie_header(url, callback),
            None => self.fail(callback, None),
        }
    }

    fn set_cookie_line(&self, url: &Url, line: &str, callback: SetCookieCallback) {
        match self.resolve("set_cookie_line") {
            Some(store) => store.set_cookie_line(url, line, callback),
            None => self.fail(callback, false),
        }
    }

    fn delete_cookies(&self, url: Option<&Url>, name: Option<&str>, callback: DeleteCookiesCallback) {
        match self.resolve("delete_cookies") {
            Some(store) => store.delete_cookies(url, name, callback),
            None => self.fail(callback, 0),
        }
    }

    fn all_cookies(&self, callback: CookieListCallback) {
        match self.resolve("all_cookies") {
            Some(store) => store.all_cookies(callback),
            None => self.fail(callback, Vec::new()),
        }
    }

    fn flush(&self, callback: Option<FlushCallback>) {
        match self.resolve("flush") {
            Some(store) => store.flush(callback),
            None => {
                if let Some(callback) = callback {
                    self.fail(|()| callback(), ());
                }
            }
        }
    }
}
