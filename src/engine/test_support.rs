//! Shared helpers for the inline test modules.

use crate::engine::cookies::{
    AsyncCookieStore, Cookie, CookieHeaderCallback, CookieListCallback, CookieStoreProxy, CookieStoreSource,
    DeleteCookiesCallback, FlushCallback, SetCookieCallback,
};
use crate::engine::io_thread::IoThread;
use crate::engine::resource::{RequestJobCallback, ResourceHandler, WeakCallback};
use crate::net::status::{NetError, RequestStatus};
use crate::net::url_request::RequestJobDelegate;
use crate::net::{Request, ResourceResponse};
use http::header::{HeaderName, HeaderValue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};
use url::Url;

const TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub(crate) fn io_thread() -> Arc<IoThread> {
    IoThread::spawn("test-io").expect("spawn I/O thread")
}

/// Runs `f` on the I/O thread and returns its result.
pub(crate) fn run_on<R, F>(io: &Arc<IoThread>, f: F) -> R
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    assert!(io.post(move || {
        let _ = tx.send(f());
    }));
    recv(&rx)
}

pub(crate) fn recv<T>(rx: &mpsc::Receiver<T>) -> T {
    rx.recv_timeout(TIMEOUT).expect("timed out waiting for the I/O thread")
}

pub(crate) fn wait_until(cond: impl Fn() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not met in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandlerCall {
    ProcessRequest,
    GetResponseHeaders,
    ReadResponse,
    Cancel,
    CanGetCookie,
    CanSetCookie,
}

#[derive(Default)]
struct Script {
    status: Option<u16>,
    mime: Option<String>,
    headers: Vec<(HeaderName, String)>,
    redirect: Option<Url>,
    error: Option<NetError>,
    unknown_length: bool,
    chunk: Option<usize>,
    stop_after: Option<usize>,
    decline: bool,
    drop_callback: bool,
    hold_headers: bool,
    async_reads: bool,
    refuse_get: bool,
    refuse_set: Vec<String>,
}

#[derive(Default)]
struct Recorded {
    calls: Vec<HandlerCall>,
    last_request: Option<Request>,
    set_cookie_checks: Vec<String>,
    offset: usize,
    held_headers: Option<RequestJobCallback>,
    held_read: Option<RequestJobCallback>,
    reads_released: bool,
    read_callbacks: Vec<WeakCallback>,
}

/// A [`ResourceHandler`] whose behaviour is scripted up front and that records every call.
pub(crate) struct ScriptedHandler {
    body: Vec<u8>,
    script: Script,
    rec: Mutex<Recorded>,
}

impl ScriptedHandler {
    pub(crate) fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            script: Script::default(),
            rec: Mutex::new(Recorded::default()),
        }
    }

    pub(crate) fn status(mut self, status: u16) -> Self {
        self.script.status = Some(status);
        self
    }

    pub(crate) fn mime(mut self, mime: &str) -> Self {
        self.script.mime = Some(mime.to_string());
        self
    }

    pub(crate) fn header(mut self, name: HeaderName, value: &str) -> Self {
        self.script.headers.push((name, value.to_string()));
        self
    }

    pub(crate) fn redirect_to(mut self, url: &str) -> Self {
        self.script.redirect = Some(Url::parse(url).expect("redirect url"));
        self
    }

    pub(crate) fn error(mut self, error: NetError) -> Self {
        self.script.error = Some(error);
        self
    }

    pub(crate) fn unknown_length(mut self) -> Self {
        self.script.unknown_length = true;
        self
    }

    pub(crate) fn chunk(mut self, n: usize) -> Self {
        self.script.chunk = Some(n);
        self
    }

    /// `read_response` returns false once `n` bytes were delivered.
    pub(crate) fn stop_after(mut self, n: usize) -> Self {
        self.script.stop_after = Some(n);
        self
    }

    pub(crate) fn decline(mut self) -> Self {
        self.script.decline = true;
        self
    }

    /// Accepts the request but drops the headers callback without resuming it.
    pub(crate) fn drop_callback(mut self) -> Self {
        self.script.drop_callback = true;
        self
    }

    /// Keeps the headers callback until [`ScriptedHandler::release_headers`].
    pub(crate) fn hold_headers(mut self) -> Self {
        self.script.hold_headers = true;
        self
    }

    /// Reads report "no data yet" until [`ScriptedHandler::release_reads`].
    pub(crate) fn async_reads(mut self) -> Self {
        self.script.async_reads = true;
        self
    }

    pub(crate) fn refuse_get(mut self) -> Self {
        self.script.refuse_get = true;
        self
    }

    pub(crate) fn refuse_set(mut self, name: &str) -> Self {
        self.script.refuse_set.push(name.to_string());
        self
    }

    pub(crate) fn release_headers(&self) {
        let cb = self.rec.lock().unwrap().held_headers.take();
        if let Some(cb) = cb {
            cb.resume();
        }
    }

    pub(crate) fn release_reads(&self) {
        let cb = {
            let mut rec = self.rec.lock().unwrap();
            rec.reads_released = true;
            rec.held_read.clone()
        };
        if let Some(cb) = cb {
            cb.resume();
        }
    }

    /// Drops the bytes callback of the pending read without answering it.
    pub(crate) fn forget_read_callback(&self) {
        let cb = self.rec.lock().unwrap().held_read.take();
        drop(cb);
    }

    /// Every read was handed the same callback.
    pub(crate) fn read_callback_reused(&self) -> bool {
        let rec = self.rec.lock().unwrap();
        match rec.read_callbacks.split_first() {
            Some((first, rest)) => rest.iter().all(|cb| cb.ptr_eq(first)),
            None => false,
        }
    }

    pub(crate) fn count(&self, call: HandlerCall) -> usize {
        self.rec.lock().unwrap().calls.iter().filter(|c| **c == call).count()
    }

    pub(crate) fn last_request(&self) -> Option<Request> {
        self.rec.lock().unwrap().last_request.clone()
    }

    pub(crate) fn set_cookie_checks(&self) -> Vec<String> {
        self.rec.lock().unwrap().set_cookie_checks.clone()
    }

    fn record(&self, call: HandlerCall) {
        self.rec.lock().unwrap().calls.push(call);
    }
}

impl ResourceHandler for ScriptedHandler {
    fn process_request(&self, request: &Request, callback: &RequestJobCallback) -> bool {
        self.record(HandlerCall::ProcessRequest);
        self.rec.lock().unwrap().last_request = Some(request.clone());
        if self.script.decline {
            return false;
        }
        if self.script.drop_callback {
            return true;
        }
        if self.script.hold_headers {
            self.rec.lock().unwrap().held_headers = Some(callback.clone());
            return true;
        }
        callback.resume();
        true
    }

    fn get_response_headers(&self, response: &mut ResourceResponse, remaining_length: &mut i64, redirect_url: &mut Option<Url>) {
        self.record(HandlerCall::GetResponseHeaders);
        if let Some(status) = self.script.status {
            response.set_status(status);
        }
        if let Some(mime) = &self.script.mime {
            response.set_mime_type(mime.clone());
        }
        for (name, value) in &self.script.headers {
            response.append_header(name.clone(), HeaderValue::from_str(value).expect("header value"));
        }
        if let Some(error) = self.script.error {
            response.set_error(error);
        }
        *redirect_url = self.script.redirect.clone();
        *remaining_length = if self.script.unknown_length { -1 } else { self.body.len() as i64 };
    }

    fn read_response(&self, buf: &mut [u8], bytes_read: &mut usize, callback: &RequestJobCallback) -> bool {
        self.record(HandlerCall::ReadResponse);
        let mut rec = self.rec.lock().unwrap();
        rec.read_callbacks.push(callback.downgrade());

        if self.script.async_reads && !rec.reads_released {
            rec.held_read = Some(callback.clone());
            *bytes_read = 0;
            return true;
        }

        let limit = self.script.stop_after.unwrap_or(self.body.len()).min(self.body.len());
        if rec.offset >= limit {
            return false;
        }
        let n = (limit - rec.offset)
            .min(buf.len())
            .min(self.script.chunk.unwrap_or(usize::MAX));
        buf[..n].copy_from_slice(&self.body[rec.offset..rec.offset + n]);
        rec.offset += n;
        *bytes_read = n;
        true
    }

    fn cancel(&self) {
        self.record(HandlerCall::Cancel);
    }

    fn can_get_cookie(&self, _cookie: &Cookie) -> bool {
        self.record(HandlerCall::CanGetCookie);
        !self.script.refuse_get
    }

    fn can_set_cookie(&self, cookie: &Cookie) -> bool {
        self.record(HandlerCall::CanSetCookie);
        self.rec.lock().unwrap().set_cookie_checks.push(cookie.name.clone());
        !self.script.refuse_set.contains(&cookie.name)
    }
}

#[derive(Default)]
struct DelegateLog {
    headers_complete: bool,
    reads: Vec<Vec<u8>>,
    done: Vec<RequestStatus>,
    content_length: Option<u64>,
}

/// A [`RequestJobDelegate`] that only records what it is told.
#[derive(Default)]
pub(crate) struct RecordingDelegate {
    log: Mutex<DelegateLog>,
}

impl RecordingDelegate {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn headers_complete(&self) -> bool {
        self.log.lock().unwrap().headers_complete
    }

    pub(crate) fn reads(&self) -> Vec<Vec<u8>> {
        self.log.lock().unwrap().reads.clone()
    }

    pub(crate) fn done(&self) -> Vec<RequestStatus> {
        self.log.lock().unwrap().done.clone()
    }

    pub(crate) fn content_length(&self) -> Option<u64> {
        self.log.lock().unwrap().content_length
    }
}

impl RequestJobDelegate for RecordingDelegate {
    fn on_headers_complete(&self) {
        self.log.lock().unwrap().headers_complete = true;
    }

    fn on_read_complete(&self, data: Vec<u8>) {
        self.log.lock().unwrap().reads.push(data);
    }

    fn on_done(&self, status: RequestStatus) {
        self.log.lock().unwrap().done.push(status);
    }

    fn record_content_length(&self, bytes: u64) {
        self.log.lock().unwrap().content_length = Some(bytes);
    }
}

/// Cookie store that records `Set-Cookie` lines and notices overlapping saves.
pub(crate) struct SequencedCookieStore {
    inner: CookieStoreProxy,
    lines: Mutex<Vec<String>>,
    in_flight: Arc<AtomicBool>,
    overlapped: AtomicBool,
    hold: AtomicBool,
    held: Mutex<Option<(Url, String, SetCookieCallback)>>,
}

impl SequencedCookieStore {
    pub(crate) fn new(io: Arc<IoThread>, source: Box<dyn CookieStoreSource>) -> Arc<Self> {
        Arc::new(Self {
            inner: CookieStoreProxy::new(io, source),
            lines: Mutex::new(Vec::new()),
            in_flight: Arc::new(AtomicBool::new(false)),
            overlapped: AtomicBool::new(false),
            hold: AtomicBool::new(false),
            held: Mutex::new(None),
        })
    }

    /// Saves wait for [`SequencedCookieStore::release_save`] before reaching the store.
    pub(crate) fn hold_saves(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    pub(crate) fn has_held_save(&self) -> bool {
        self.held.lock().unwrap().is_some()
    }

    /// Forwards the held save. Must run on the I/O thread.
    pub(crate) fn release_save(&self) {
        let held = self.held.lock().unwrap().take();
        if let Some((url, line, callback)) = held {
            self.inner.set_cookie_line(&url, &line, callback);
        }
    }

    /// A save was issued and has not completed yet.
    pub(crate) fn saving(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub(crate) fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }
}

impl AsyncCookieStore for SequencedCookieStore {
    fn get_cookie_list(&self, url: &Url, callback: CookieListCallback) {
        self.inner.get_cookie_list(url, callback);
    }

    fn get_cookie_header(&self, url: &Url, callback: CookieHeaderCallback) {
        self.inner.get_cookie_header(url, callback);
    }

    fn set_cookie_line(&self, url: &Url, line: &str, callback: SetCookieCallback) {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        self.lines.lock().unwrap().push(line.to_string());
        let in_flight = self.in_flight.clone();
        let callback: SetCookieCallback = Box::new(move |ok| {
            in_flight.store(false, Ordering::SeqCst);
            callback(ok);
        });
        if self.hold.load(Ordering::SeqCst) {
            *self.held.lock().unwrap() = Some((url.clone(), line.to_string(), callback));
            return;
        }
        self.inner.set_cookie_line(url, line, callback);
    }

    fn delete_cookies(&self, url: Option<&Url>, name: Option<&str>, callback: DeleteCookiesCallback) {
        self.inner.delete_cookies(url, name, callback);
    }

    fn all_cookies(&self, callback: CookieListCallback) {
        self.inner.all_cookies(callback);
    }

    fn flush(&self, callback: Option<FlushCallback>) {
        self.inner.flush(callback);
    }
}
