use crate::engine::cookies::cookie_jar::DefaultCookieJar;
use crate::engine::cookies::store::CookieStore;
use crate::engine::cookies::{Cookie, CookieJar, CookieJarHandle};
use crate::engine::ids::ZoneId;
use std::sync::{PoisonError, Weak};
use url::Url;

/// A `CookieJar` decorator that persists changes after each mutation.
///
/// This type is *transparent* for reads but *eagerly* persists after writes. It keeps a
/// weak reference to its store, since the store itself caches this jar.
pub struct PersistentCookieJar {
    /// Zone ID associated with this jar (used to address the store).
    zone_id: ZoneId,
    /// Inner cookie jar that holds the actual cookie state.
    pub inner: CookieJarHandle,
    /// Store responsible for persistence.
    store: Weak<dyn CookieStore + Send + Sync>,
}

impl PersistentCookieJar {
    pub fn new(zone_id: ZoneId, jar: CookieJarHandle, store: Weak<dyn CookieStore + Send + Sync>) -> Self {
        Self {
            zone_id,
            inner: jar,
            store,
        }
    }

    /// Clone of the inner jar's state, if it is a [`DefaultCookieJar`].
    pub fn snapshot(&self) -> Option<DefaultCookieJar> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.as_any().downcast_ref::<DefaultCookieJar>().cloned()
    }

    /// Snapshots the inner jar and persists it to the backing store.
    fn persist(&self) {
        let Some(store) = self.store.upgrade() else {
            log::debug!("cookie store for zone {} is gone; not persisting", self.zone_id);
            return;
        };
        match self.snapshot() {
            Some(snapshot) => store.persist_zone_from_snapshot(self.zone_id, &snapshot),
            None => log::error!("cookie jar for zone {} cannot be snapshotted", self.zone_id),
        }
    }

    fn write<R>(&self, f: impl FnOnce(&mut (dyn CookieJar + Send + Sync)) -> R) -> R {
        let r = {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            f(&mut *inner)
        };
        self.persist();
        r
    }
}

impl CookieJar for PersistentCookieJar {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn set_cookie_line(&mut self, url: &Url, line: &str) -> bool {
        self.write(|jar| jar.set_cookie_line(url, line))
    }

    fn cookies_for_url(&self, url: &Url) -> Vec<Cookie> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).cookies_for_url(url)
    }

    fn all_cookies(&self) -> Vec<Cookie> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).all_cookies()
    }

    fn clear(&mut self) -> usize {
        self.write(|jar| jar.clear())
    }

    fn remove_cookie(&mut self, url: &Url, cookie_name: &str) -> usize {
        self.write(|jar| jar.remove_cookie(url, cookie_name))
    }

    fn remove_cookies_for_url(&mut self, url: &Url) -> usize {
        self.write(|jar| jar.remove_cookies_for_url(url))
    }

    fn remove_cookies_named(&mut self, cookie_name: &str) -> usize {
        self.write(|jar| jar.remove_cookies_named(cookie_name))
    }
}
