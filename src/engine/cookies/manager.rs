//! Per-context cookie manager.
//!
//! A [`CookieManager`] owns the cookie store currently backing one request context. The
//! store can be swapped at runtime with [`CookieManager::set_storage_path`]; operations
//! already handed to the old store complete against it. While the manager is still
//! initializing it has no store at all, which callers treat as "no cookies right now".

use crate::engine::cookies::async_store::{
    AsyncCookieStore, CookieListCallback, DeleteCookiesCallback, FlushCallback, JarCookieStore, SetCookieCallback,
};
use crate::engine::cookies::{Cookie, CookieStoreHandle, InMemoryCookieStore, JsonCookieStore};
use crate::engine::ids::ZoneId;
use crate::engine::io_thread::IoThread;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use url::Url;

pub struct CookieManager {
    io: Arc<IoThread>,
    zone_id: ZoneId,
    store: RwLock<Option<Arc<JarCookieStore>>>,
    storage_path: RwLock<Option<PathBuf>>,
    weak_self: Weak<CookieManager>,
}

impl CookieManager {
    /// Creates a manager with its store ready: JSON-backed at `path`, in memory otherwise.
    pub fn new(io: Arc<IoThread>, zone_id: ZoneId, path: Option<PathBuf>) -> Arc<Self> {
        let manager = Self::pending(io, zone_id);
        manager.swap_store(path);
        manager
    }

    /// Creates a manager without a store. It stays store-less until
    /// [`CookieManager::set_storage_path`] has run.
    pub fn pending(io: Arc<IoThread>, zone_id: ZoneId) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            io,
            zone_id,
            store: RwLock::new(None),
            storage_path: RwLock::new(None),
            weak_self: me.clone(),
        })
    }

    pub fn zone_id(&self) -> ZoneId {
        self.zone_id
    }

    pub fn storage_path(&self) -> Option<PathBuf> {
        self.storage_path.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// The store currently in use, `None` while initializing.
    pub fn cookie_store(&self) -> Option<Arc<JarCookieStore>> {
        self.store.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Switches to a JSON store at `path`, or to an in-memory store for `None`.
    pub fn set_storage_path(&self, path: Option<PathBuf>) -> bool {
        self.on_io(move |me| me.swap_store(path))
    }

    /// Hands every cookie to `visitor`. Returns false when there is no store yet.
    pub fn visit_all_cookies<F>(&self, visitor: F) -> bool
    where
        F: FnOnce(Vec<Cookie>) + Send + 'static,
    {
        let visitor: CookieListCallback = Box::new(visitor);
        if !self.io.currently_on() {
            return self.on_io(move |me| {
                me.visit_all_cookies(visitor);
            });
        }
        match self.cookie_store() {
            Some(store) => {
                store.all_cookies(visitor);
                true
            }
            None => false,
        }
    }

    /// Stores `cookie` as if it had been received from `url`.
    pub fn set_cookie(&self, url: &Url, cookie: &Cookie, callback: Option<SetCookieCallback>) -> bool {
        if !self.io.currently_on() {
            let (url, cookie) = (url.clone(), cookie.clone());
            return self.on_io(move |me| {
                me.set_cookie(&url, &cookie, callback);
            });
        }
        let callback = callback.unwrap_or_else(|| Box::new(|_| {}));
        match self.cookie_store() {
            Some(store) => {
                store.set_cookie_line(url, &cookie.to_set_cookie_line(), callback);
                true
            }
            None => false,
        }
    }

    /// Deletes cookies; see [`AsyncCookieStore::delete_cookies`] for the filters.
    pub fn delete_cookies(&self, url: Option<&Url>, name: Option<&str>, callback: Option<DeleteCookiesCallback>) -> bool {
        if !self.io.currently_on() {
            let (url, name) = (url.cloned(), name.map(str::to_string));
            return self.on_io(move |me| {
                me.delete_cookies(url.as_ref(), name.as_deref(), callback);
            });
        }
        let callback = callback.unwrap_or_else(|| Box::new(|_| {}));
        match self.cookie_store() {
            Some(store) => {
                store.delete_cookies(url, name, callback);
                true
            }
            None => false,
        }
    }

    pub fn flush_store(&self, callback: Option<FlushCallback>) -> bool {
        if !self.io.currently_on() {
            return self.on_io(move |me| {
                me.flush_store(callback);
            });
        }
        match self.cookie_store() {
            Some(store) => {
                store.flush(callback);
                true
            }
            None => false,
        }
    }

    /// Runs `f` on the I/O thread, inline when already there.
    fn on_io(&self, f: impl FnOnce(&CookieManager) + Send + 'static) -> bool {
        if self.io.currently_on() {
            f(self);
            return true;
        }
        let Some(me) = self.weak_self.upgrade() else {
            return false;
        };
        self.io.post(move || f(me.as_ref()))
    }

    fn swap_store(&self, path: Option<PathBuf>) {
        let backing: CookieStoreHandle = match &path {
            Some(p) => match JsonCookieStore::open(p.clone()) {
                Ok(store) => store,
                Err(e) => {
                    log::error!("zone {}: falling back to in-memory cookies: {}", self.zone_id, e);
                    InMemoryCookieStore::new()
                }
            },
            None => InMemoryCookieStore::new(),
        };

        let Some(jar) = backing.jar_for(self.zone_id) else {
            log::error!("zone {}: cookie store refused to provide a jar", self.zone_id);
            return;
        };

        let new_store = Arc::new(JarCookieStore::new(self.io.clone(), jar, Some(backing)));
        let old = self.store.write().unwrap_or_else(PoisonError::into_inner).replace(new_store);
        *self.storage_path.write().unwrap_or_else(PoisonError::into_inner) = path;

        if let Some(old) = old {
            old.flush(None);
        }
        log::debug!("zone {}: cookie store swapped", self.zone_id);
    }
}
