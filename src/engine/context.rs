//! Request contexts.
//!
//! A [`RequestContext`] owns the network primitives of one zone: its cookie manager and
//! the shared registry, HTTP client and request defaults. Partition-scoped handlers get a
//! [`RequestContextProxy`] that shares all of that and only brings its own cookie view.
//!
//! Proxies are not dropped on release. A proxy with requests in flight first cancels
//! them and retries the release on a later turn of the I/O thread, once.

mod proxy;

pub use proxy::RequestContextProxy;

use crate::engine::config::RequestDefaults;
use crate::engine::cookies::CookieManager;
use crate::engine::ids::{ProxyId, ZoneId};
use crate::engine::io_thread::IoThread;
use crate::engine::scheme::HandlerRegistry;
use crate::net::{LoadError, Request, RequestHandle, Response};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Release attempts after the first one before a lingering proxy is a bug.
const MAX_RELEASE_RETRIES: u32 = 1;

/// Supplied by the embedder for a partition-scoped proxy.
pub trait RequestContextHandler: Send + Sync {
    /// Cookie manager for this partition. `None` uses the parent context's cookies.
    /// Asked again on every cookie operation.
    fn cookie_manager(&self) -> Option<Arc<CookieManager>>;
}

/// Network primitives shared by every context and proxy of a service.
pub(crate) struct NetworkPrimitives {
    pub(crate) io: Arc<IoThread>,
    pub(crate) registry: Arc<Mutex<HandlerRegistry>>,
    pub(crate) http_client: reqwest::Client,
    pub(crate) defaults: RequestDefaults,
    pub(crate) read_buffer_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReleaseStep {
    Remove,
    CancelAndRetry,
}

fn next_release_step(id: ProxyId, in_flight: usize, retries: u32) -> ReleaseStep {
    if in_flight == 0 {
        return ReleaseStep::Remove;
    }
    assert!(
        retries < MAX_RELEASE_RETRIES,
        "{id} still has {in_flight} request(s) in flight after canceling them"
    );
    ReleaseStep::CancelAndRetry
}

pub struct RequestContext {
    zone_id: ZoneId,
    shared: Arc<NetworkPrimitives>,
    cookie_manager: Arc<CookieManager>,
    /// Serves requests that are not scoped to a handler
    default_proxy: Arc<RequestContextProxy>,
    proxies: Mutex<HashMap<ProxyId, Arc<RequestContextProxy>>>,
    shutting_down: AtomicBool,
    weak_self: Weak<RequestContext>,
}

impl RequestContext {
    pub(crate) fn new(zone_id: ZoneId, shared: Arc<NetworkPrimitives>, cookie_manager: Arc<CookieManager>) -> Arc<Self> {
        let default_proxy = RequestContextProxy::new(shared.clone(), None, cookie_manager.clone());
        Arc::new_cyclic(|me| Self {
            zone_id,
            shared,
            cookie_manager,
            default_proxy,
            proxies: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
            weak_self: me.clone(),
        })
    }

    fn proxies(&self) -> MutexGuard<'_, HashMap<ProxyId, Arc<RequestContextProxy>>> {
        self.proxies.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn assert_on_io(&self, op: &str) {
        assert!(self.shared.io.currently_on(), "RequestContext::{op} called off the I/O thread");
    }

    pub fn zone_id(&self) -> ZoneId {
        self.zone_id
    }

    pub fn cookie_manager(&self) -> Arc<CookieManager> {
        self.cookie_manager.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Creates a proxy whose cookies are resolved through `handler`.
    pub fn create_proxy(&self, handler: Arc<dyn RequestContextHandler>) -> Arc<RequestContextProxy> {
        self.assert_on_io("create_proxy");
        let proxy = RequestContextProxy::new(self.shared.clone(), Some(handler), self.cookie_manager.clone());
        if self.is_shutting_down() {
            proxy.close();
        }
        self.proxies().insert(proxy.id(), proxy.clone());
        log::debug!("zone {}: created {}", self.zone_id, proxy.id());
        proxy
    }

    /// Releases a proxy created by [`RequestContext::create_proxy`]. Requests still in
    /// flight on it are canceled first.
    pub fn release_proxy(&self, id: ProxyId) {
        self.assert_on_io("release_proxy");
        self.try_release(id, 0);
    }

    fn try_release(&self, id: ProxyId, retries: u32) {
        if self.is_shutting_down() {
            log::debug!("zone {}: shutting down, dropping release of {}", self.zone_id, id);
            return;
        }
        let Some(proxy) = self.proxies().get(&id).cloned() else {
            return;
        };

        match next_release_step(id, proxy.in_flight_count(), retries) {
            ReleaseStep::Remove => {
                self.proxies().remove(&id);
                log::debug!("zone {}: released {}", self.zone_id, id);
            }
            ReleaseStep::CancelAndRetry => {
                log::debug!("zone {}: canceling requests of {} before release", self.zone_id, id);
                // Canceling may post more work; the retry runs after it
                proxy.cancel_all();
                let me = self.weak_self.clone();
                let posted = self.shared.io.post(move || {
                    if let Some(ctx) = me.upgrade() {
                        ctx.try_release(id, retries + 1);
                    }
                });
                if !posted {
                    log::warn!("zone {}: cannot retry release of {}, I/O thread stopped", self.zone_id, id);
                }
            }
        }
    }

    /// Number of live proxies, the default one excluded.
    pub fn proxy_count(&self) -> usize {
        self.proxies().len()
    }

    /// Starts a request outside any handler scope. Safe to call from any thread.
    pub fn start_request(&self, request: Request) -> RequestHandle {
        self.default_proxy.start_request(request)
    }

    pub async fn fetch(&self, request: Request) -> Result<Response, LoadError> {
        self.start_request(request).response().await
    }

    /// Cancels every request on this context and flushes its cookies. Pending proxy
    /// releases are dropped. Safe to call from any thread.
    pub fn shutdown(&self) {
        if !self.shared.io.currently_on() {
            let me = self.weak_self.clone();
            let posted = self.shared.io.post(move || {
                if let Some(ctx) = me.upgrade() {
                    ctx.shutdown();
                }
            });
            if !posted {
                log::warn!("zone {}: I/O thread stopped before shutdown", self.zone_id);
            }
            return;
        }

        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let proxies: Vec<_> = self.proxies().drain().map(|(_, p)| p).collect();
        log::debug!("zone {}: shutting down with {} proxies", self.zone_id, proxies.len());
        for proxy in proxies.iter().chain(std::iter::once(&self.default_proxy)) {
            proxy.close();
        }
        self.cookie_manager.flush_store(None);
    }
}
