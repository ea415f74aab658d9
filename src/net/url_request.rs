//! The request layer that drives a [`ResourceRequestJob`].
//!
//! A [`UrlRequest`] is what the job reports to: it picks the handler for a request,
//! starts the job, decides whether the response is a redirect, pulls the body and
//! finally resolves the [`RequestHandle`] the caller awaits.

use crate::engine::context::{NetworkPrimitives, RequestContextProxy};
use crate::engine::cookies::AsyncCookieStore;
use crate::engine::ids::RequestId;
use crate::engine::io_thread::IoThread;
use crate::engine::resource::{ReadResult, ResourceHandler, ResourceRequestJob};
use crate::engine::scheme::Route;
use crate::net::fetch::HttpResourceHandler;
use crate::net::status::{NetError, RequestStatus};
use crate::net::{Request, Response};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::oneshot;
use url::Url;

/// Receives the progress of a [`ResourceRequestJob`]. Called on the I/O thread.
pub trait RequestJobDelegate: Send + Sync {
    /// Headers, and with them any redirect, are final.
    fn on_headers_complete(&self);
    /// An asynchronous read finished. An empty buffer means EOF.
    fn on_read_complete(&self, data: Vec<u8>);
    /// The job finished. Called once.
    fn on_done(&self, status: RequestStatus);
    /// Total number of body bytes delivered.
    fn record_content_length(&self, bytes: u64);
}

/// Something a request context proxy can cancel on teardown.
pub(crate) trait InFlightRequest: Send + Sync {
    fn cancel(&self);
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("request canceled")]
    Canceled,

    #[error(transparent)]
    Net(#[from] NetError),

    #[error("no handler for url scheme '{0}'")]
    UnknownScheme(String),
}

type Reply = Result<Response, LoadError>;

struct LoadState {
    reply: Option<oneshot::Sender<Reply>>,
    body: Vec<u8>,
    content_length: Option<u64>,
    finished: bool,
}

pub struct UrlRequest {
    id: RequestId,
    io: Arc<IoThread>,
    request: Request,
    read_buffer_size: usize,
    job: Mutex<Option<Arc<ResourceRequestJob>>>,
    state: Mutex<LoadState>,
    proxy: Weak<RequestContextProxy>,
    weak_self: Weak<UrlRequest>,
}

impl UrlRequest {
    pub(crate) fn new(
        shared: &NetworkPrimitives,
        request: Request,
        proxy: Weak<RequestContextProxy>,
    ) -> (Arc<Self>, RequestHandle) {
        let (tx, rx) = oneshot::channel();
        let me = Arc::new_cyclic(|weak_self| Self {
            id: RequestId::next(),
            io: shared.io.clone(),
            request,
            read_buffer_size: shared.read_buffer_size,
            job: Mutex::new(None),
            state: Mutex::new(LoadState {
                reply: Some(tx),
                body: Vec::new(),
                content_length: None,
                finished: false,
            }),
            proxy,
            weak_self: weak_self.clone(),
        });
        let handle = RequestHandle {
            request: me.clone(),
            rx,
        };
        (me, handle)
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, LoadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn job(&self) -> Option<Arc<ResourceRequestJob>> {
        self.job.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Picks a handler for the request and starts its job.
    pub(crate) fn start(&self, shared: &NetworkPrimitives, cookie_store: Arc<dyn AsyncCookieStore>) {
        assert!(self.io.currently_on(), "UrlRequest::start called off the I/O thread");
        let Some(handler) = self.create_handler(shared) else {
            log::debug!("{}: no handler for {}", self.id, self.request.url());
            self.finish(Err(LoadError::UnknownScheme(self.request.scheme().to_string())));
            return;
        };

        let Some(delegate) = self.weak_self.upgrade() else {
            return;
        };
        let job = ResourceRequestJob::new(
            self.io.clone(),
            self.request.clone(),
            handler,
            delegate,
            cookie_store,
            shared.defaults.clone(),
        );
        *self.job.lock().unwrap_or_else(PoisonError::into_inner) = Some(job.clone());
        job.start();
    }

    fn create_handler(&self, shared: &NetworkPrimitives) -> Option<Arc<dyn ResourceHandler>> {
        // The registry lock is not held while the factory runs
        let route = shared.registry.lock().unwrap_or_else(PoisonError::into_inner).route(&self.request);
        let builtin = || -> Arc<dyn ResourceHandler> {
            Arc::new(HttpResourceHandler::new(shared.io.clone(), shared.http_client.clone()))
        };

        match route {
            Route::Factory { factory, builtin_fallback } => {
                let handler = factory.create(
                    self.request.tab_id(),
                    self.request.frame_id(),
                    self.request.scheme(),
                    &self.request,
                );
                match handler {
                    Some(handler) => Some(handler),
                    None if builtin_fallback => {
                        log::trace!("{}: factory passed, using the built-in job", self.id);
                        Some(builtin())
                    }
                    None => None,
                }
            }
            Route::BuiltIn => Some(builtin()),
            Route::Unhandled => None,
        }
    }

    fn read_loop(&self, job: &ResourceRequestJob) {
        let mut buf = vec![0u8; self.read_buffer_size];
        loop {
            match job.read_raw_data(&mut buf) {
                ReadResult::Data(n) => self.lock().body.extend_from_slice(&buf[..n]),
                // on_done completes the request
                ReadResult::Eof | ReadResult::Pending | ReadResult::Aborted => return,
            }
        }
    }

    fn complete(&self, redirect: Option<Url>) {
        let head = self.job().and_then(|job| job.response()).unwrap_or_default();
        let (body, content_length) = {
            let mut st = self.lock();
            (std::mem::take(&mut st.body), st.content_length)
        };
        self.finish(Ok(Response {
            url: self.request.url().clone(),
            status: head.status(),
            status_text: head.status_text().to_string(),
            mime_type: head.mime_type().map(str::to_string),
            headers: head.headers().clone(),
            redirect,
            body,
            content_length,
        }));
    }

    /// Detaches from the proxy, then resolves the handle. Only the first call counts.
    fn finish(&self, result: Reply) {
        let reply = {
            let mut st = self.lock();
            if st.finished {
                return;
            }
            st.finished = true;
            st.reply.take()
        };
        self.job.lock().unwrap_or_else(PoisonError::into_inner).take();

        // Whoever awaits the reply must not see this request as in flight
        if let Some(proxy) = self.proxy.upgrade() {
            proxy.detach(self.id);
        }
        if let Some(tx) = reply {
            // The caller may have dropped the handle
            let _ = tx.send(result);
        }
    }
}

impl RequestJobDelegate for UrlRequest {
    fn on_headers_complete(&self) {
        let Some(job) = self.job() else {
            return;
        };
        if let Some((target, status)) = job.is_redirect_response() {
            log::debug!("{}: {} redirect to {}", self.id, status, target);
            self.complete(Some(target));
            job.kill();
            return;
        }
        self.read_loop(&job);
    }

    fn on_read_complete(&self, data: Vec<u8>) {
        if data.is_empty() {
            return;
        }
        self.lock().body.extend_from_slice(&data);
        if let Some(job) = self.job() {
            self.read_loop(&job);
        }
    }

    fn on_done(&self, status: RequestStatus) {
        match status {
            RequestStatus::Success => self.complete(None),
            RequestStatus::Canceled => self.finish(Err(LoadError::Canceled)),
            RequestStatus::Failed(e) => self.finish(Err(LoadError::Net(e))),
            RequestStatus::IoPending => {}
        }
    }

    fn record_content_length(&self, bytes: u64) {
        self.lock().content_length = Some(bytes);
    }
}

impl InFlightRequest for UrlRequest {
    fn cancel(&self) {
        if let Some(job) = self.job() {
            job.kill();
        }
        self.finish(Err(LoadError::Canceled));
    }
}

/// Caller side of a started request.
pub struct RequestHandle {
    request: Arc<UrlRequest>,
    rx: oneshot::Receiver<Reply>,
}

impl RequestHandle {
    pub fn id(&self) -> RequestId {
        self.request.id
    }

    pub fn url(&self) -> &Url {
        self.request.request.url()
    }

    /// Cancels the request. Safe to call from any thread.
    pub fn cancel(&self) {
        let request = self.request.clone();
        if request.io.currently_on() {
            InFlightRequest::cancel(request.as_ref());
            return;
        }
        let io = request.io.clone();
        if !io.post(move || InFlightRequest::cancel(request.as_ref())) {
            log::warn!("{}: cannot cancel, I/O thread '{}' stopped", self.request.id, io.name());
        }
    }

    /// Waits for the request to finish.
    pub async fn response(self) -> Result<Response, LoadError> {
        self.rx.await.unwrap_or(Err(LoadError::Canceled))
    }
}

impl std::fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle")
            .field("id", &self.request.id)
            .field("url", &self.request.request.url().as_str())
            .finish()
    }
}
