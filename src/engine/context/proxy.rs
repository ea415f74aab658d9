use crate::engine::context::{NetworkPrimitives, RequestContextHandler};
use crate::engine::cookies::{CookieManager, CookieStoreProxy, CookieStoreSource, HandlerCookieSource, ParentCookieSource};
use crate::engine::ids::{ProxyId, RequestId};
use crate::net::url_request::InFlightRequest;
use crate::net::{Request, RequestHandle, UrlRequest};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// A view on a [`RequestContext`](crate::engine::context::RequestContext) that shares
/// all of its network primitives and owns only its cookie store proxy.
pub struct RequestContextProxy {
    id: ProxyId,
    shared: Arc<NetworkPrimitives>,
    handler: Option<Arc<dyn RequestContextHandler>>,
    cookie_store: Arc<CookieStoreProxy>,
    url_requests: Mutex<HashMap<RequestId, Weak<dyn InFlightRequest>>>,
    /// Set on context shutdown; new requests are canceled right away
    closed: AtomicBool,
    weak_self: Weak<RequestContextProxy>,
}

impl RequestContextProxy {
    pub(crate) fn new(
        shared: Arc<NetworkPrimitives>,
        handler: Option<Arc<dyn RequestContextHandler>>,
        parent_cookies: Arc<CookieManager>,
    ) -> Arc<Self> {
        let source: Box<dyn CookieStoreSource> = match &handler {
            Some(h) => Box::new(HandlerCookieSource::new(h.clone(), parent_cookies)),
            None => Box::new(ParentCookieSource::new(parent_cookies)),
        };
        let cookie_store = Arc::new(CookieStoreProxy::new(shared.io.clone(), source));

        Arc::new_cyclic(|me| Self {
            id: ProxyId::next(),
            shared,
            handler,
            cookie_store,
            url_requests: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            weak_self: me.clone(),
        })
    }

    fn requests(&self) -> MutexGuard<'_, HashMap<RequestId, Weak<dyn InFlightRequest>>> {
        self.url_requests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> ProxyId {
        self.id
    }

    pub fn handler(&self) -> Option<Arc<dyn RequestContextHandler>> {
        self.handler.clone()
    }

    pub fn cookie_store(&self) -> Arc<CookieStoreProxy> {
        self.cookie_store.clone()
    }

    pub(crate) fn attach(&self, id: RequestId, request: Weak<dyn InFlightRequest>) {
        self.requests().insert(id, request);
    }

    pub(crate) fn detach(&self, id: RequestId) {
        self.requests().remove(&id);
    }

    /// Requests started through this proxy that have not finished.
    pub fn in_flight_count(&self) -> usize {
        let mut requests = self.requests();
        requests.retain(|_, r| r.strong_count() > 0);
        requests.len()
    }

    /// Cancels every attached request.
    pub fn cancel_all(&self) {
        let requests: Vec<_> = self.requests().values().filter_map(Weak::upgrade).collect();
        if !requests.is_empty() {
            log::debug!("{}: canceling {} request(s)", self.id, requests.len());
        }
        for request in requests {
            request.cancel();
        }
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.cancel_all();
    }

    /// Starts `request`. Safe to call from any thread; the request is started on the
    /// I/O thread.
    pub fn start_request(&self, request: Request) -> RequestHandle {
        let (url_request, handle) = UrlRequest::new(&self.shared, request, self.weak_self.clone());

        let me = self.weak_self.clone();
        let req = url_request.clone();
        let launch = move || {
            if let Some(proxy) = me.upgrade() {
                proxy.launch(&req);
            } else {
                InFlightRequest::cancel(req.as_ref());
            }
        };

        let io = &self.shared.io;
        if io.currently_on() {
            launch();
        } else if !io.post(launch) {
            log::warn!("{}: I/O thread '{}' stopped, canceling {}", self.id, io.name(), url_request.id());
            InFlightRequest::cancel(url_request.as_ref());
        }
        handle
    }

    fn launch(&self, request: &Arc<UrlRequest>) {
        if self.closed.load(Ordering::SeqCst) {
            InFlightRequest::cancel(request.as_ref());
            return;
        }
        let weak: Weak<dyn InFlightRequest> = Arc::downgrade(request) as Weak<dyn InFlightRequest>;
        self.attach(request.id(), weak);
        request.start(&self.shared, self.cookie_store.clone());
    }
}

impl std::fmt::Debug for RequestContextProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContextProxy")
            .field("id", &self.id)
            .field("scoped", &self.handler.is_some())
            .finish_non_exhaustive()
    }
}
