//! The resource job state machine.
//!
//! ```text
//! Idle ─► LoadingCookies ─► StartingTransaction ─► HeadersPending ─► SavingCookies
//!   │                              ▲                                      │
//!   └──── (DO_NOT_SEND_COOKIES) ───┘                                      ▼
//!                                         Done ◄── ReadingBody ◄── HeadersComplete
//! ```
//!
//! `Canceled` is reachable from every phase but `Done`. The job is affine to the I/O
//! thread; every entry point asserts it. No lock is held while calling into the
//! handler, the cookie store or the delegate.

use crate::engine::config::RequestDefaults;
use crate::engine::cookies::{AsyncCookieStore, Cookie};
use crate::engine::io_thread::IoThread;
use crate::engine::resource::{mime_type_from_url, CallbackKind, RequestJobCallback, ResourceHandler, WeakCallback};
use crate::net::status::{NetError, RequestStatus};
use crate::net::url_request::RequestJobDelegate;
use crate::net::{LoadFlags, Request, ResourceResponse};
use http::header::{HeaderName, HeaderValue, ACCEPT_LANGUAGE, COOKIE, USER_AGENT};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Idle,
    LoadingCookies,
    StartingTransaction,
    HeadersPending,
    SavingCookies,
    HeadersComplete,
    ReadingBody,
    Canceled,
    Done,
}

/// Outcome of [`ResourceRequestJob::read_raw_data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadResult {
    /// `n` bytes were written to the start of the buffer.
    Data(usize),
    /// The body is complete.
    Eof,
    /// No data yet. The job delivers it later through
    /// [`RequestJobDelegate::on_read_complete`].
    Pending,
    /// The job was canceled.
    Aborted,
}

struct JobState {
    phase: JobPhase,
    /// Snapshot of the live request; read-only once the handler sees it.
    request: Request,
    response: Option<ResourceResponse>,
    redirect_url: Option<Url>,
    /// `-1` when unknown: the body ends when the handler says so.
    remaining_bytes: i64,
    sent_bytes: u64,
    response_cookies: Vec<String>,
    cookie_save_index: usize,
    callback: Option<WeakCallback>,
    /// Bytes callback kept across synchronous pulls. Released while a read is pending
    /// so the handler holds the only reference.
    bytes_callback: Option<RequestJobCallback>,
    status: RequestStatus,
    handler_canceled: bool,
    notified_done: bool,
}

pub struct ResourceRequestJob {
    io: Arc<IoThread>,
    handler: Arc<dyn ResourceHandler>,
    delegate: Arc<dyn RequestJobDelegate>,
    cookie_store: Arc<dyn AsyncCookieStore>,
    defaults: RequestDefaults,
    state: Mutex<JobState>,
    weak_self: Weak<ResourceRequestJob>,
}

impl ResourceRequestJob {
    pub fn new(
        io: Arc<IoThread>,
        request: Request,
        handler: Arc<dyn ResourceHandler>,
        delegate: Arc<dyn RequestJobDelegate>,
        cookie_store: Arc<dyn AsyncCookieStore>,
        defaults: RequestDefaults,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            io,
            handler,
            delegate,
            cookie_store,
            defaults,
            state: Mutex::new(JobState {
                phase: JobPhase::Idle,
                request,
                response: None,
                redirect_url: None,
                remaining_bytes: 0,
                sent_bytes: 0,
                response_cookies: Vec::new(),
                cookie_save_index: 0,
                callback: None,
                bytes_callback: None,
                status: RequestStatus::Success,
                handler_canceled: false,
                notified_done: false,
            }),
            weak_self: me.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn assert_on_io(&self, op: &str) {
        assert!(self.io.currently_on(), "ResourceRequestJob::{op} called off the I/O thread");
    }

    /// Detaches the live callback. The caller drops the returned reference after
    /// releasing the lock.
    fn detach_callback(st: &mut JobState) -> Option<RequestJobCallback> {
        if let Some(cb) = st.callback.take() {
            cb.detach();
        }
        st.bytes_callback.take()
    }

    fn set_phase(st: &mut JobState, phase: JobPhase) {
        log::trace!("job {}: {:?} -> {:?}", st.request.url(), st.phase, phase);
        st.phase = phase;
    }

    pub fn phase(&self) -> JobPhase {
        self.lock().phase
    }

    pub fn status(&self) -> RequestStatus {
        self.lock().status
    }

    /// Snapshot of the request as the handler sees it.
    pub fn request(&self) -> Request {
        self.lock().request.clone()
    }

    /// Response head, once the handler provided it.
    pub fn response(&self) -> Option<ResourceResponse> {
        self.lock().response.clone()
    }

    pub fn sent_bytes(&self) -> u64 {
        self.lock().sent_bytes
    }

    /// Starts the job: loads cookies unless the request forbids it, then hands the
    /// request to the handler.
    pub fn start(&self) {
        self.assert_on_io("start");
        let send_cookies = {
            let mut st = self.lock();
            if st.phase != JobPhase::Idle {
                log::warn!("job {} started twice", st.request.url());
                return;
            }
            self.apply_defaults(&mut st.request);

            let send_cookies = !st.request.load_flags().contains(LoadFlags::DO_NOT_SEND_COOKIES);
            let next = if send_cookies { JobPhase::LoadingCookies } else { JobPhase::StartingTransaction };
            Self::set_phase(&mut st, next);
            send_cookies
        };

        if send_cookies {
            self.load_cookies();
        } else {
            self.start_transaction();
        }
    }

    fn apply_defaults(&self, request: &mut Request) {
        let defaults: [(HeaderName, Option<&String>); 2] = [
            (USER_AGENT, self.defaults.user_agent.as_ref()),
            (ACCEPT_LANGUAGE, self.defaults.accept_language.as_ref()),
        ];
        for (name, value) in defaults {
            let Some(value) = value else { continue };
            if request.headers().contains_key(&name) {
                continue;
            }
            match HeaderValue::from_str(value) {
                Ok(v) => request.set_header(name, v),
                Err(_) => log::warn!("default {} is not a valid header value", name),
            }
        }
    }

    fn load_cookies(&self) {
        let url = self.lock().request.url().clone();
        let me = self.weak_self.clone();
        self.cookie_store.get_cookie_list(
            &url,
            Box::new(move |cookies| {
                if let Some(job) = me.upgrade() {
                    job.check_cookies_before_send(cookies);
                }
            }),
        );
    }

    fn check_cookies_before_send(&self, cookies: Vec<Cookie>) {
        if self.phase() == JobPhase::Canceled || cookies.is_empty() {
            self.start_transaction();
            return;
        }

        // Stops at the first refusal
        if !cookies.iter().all(|c| self.handler.can_get_cookie(c)) {
            self.start_transaction();
            return;
        }

        let url = self.lock().request.url().clone();
        let me = self.weak_self.clone();
        self.cookie_store.get_cookie_header(
            &url,
            Box::new(move |header| {
                if let Some(job) = me.upgrade() {
                    job.on_cookies_loaded(header);
                }
            }),
        );
    }

    fn on_cookies_loaded(&self, header: Option<String>) {
        if let Some(header) = header.filter(|h| !h.is_empty()) {
            let mut st = self.lock();
            if st.phase == JobPhase::LoadingCookies {
                match HeaderValue::from_str(&header) {
                    Ok(v) => st.request.set_header(COOKIE, v),
                    Err(_) => log::warn!("cookie header for {} is not a valid header value", st.request.url()),
                }
            }
        }
        self.start_transaction();
    }

    fn start_transaction(&self) {
        let request = {
            let mut st = self.lock();
            if st.phase == JobPhase::Canceled {
                drop(st);
                self.notify_canceled();
                return;
            }
            Self::set_phase(&mut st, JobPhase::StartingTransaction);
            st.request.set_read_only();
            Self::set_phase(&mut st, JobPhase::HeadersPending);
            st.request.clone()
        };

        let callback = RequestJobCallback::new(CallbackKind::HeadersAvailable, self.io.clone(), self.weak_self.clone());
        self.lock().callback = Some(callback.downgrade());

        if !self.handler.process_request(&request, &callback) {
            log::debug!("handler declined {}", request.url());
            callback.detach();
            self.kill();
        }
    }

    /// Headers are available: collects them from the handler, then saves response
    /// cookies. Runs from the headers callback.
    pub(crate) fn send_headers(&self) {
        self.assert_on_io("send_headers");
        let url = {
            let st = self.lock();
            if st.phase != JobPhase::HeadersPending {
                return;
            }
            st.request.url().clone()
        };

        let mut response = ResourceResponse::new();
        let mut remaining: i64 = 0;
        let mut redirect: Option<Url> = None;
        self.handler.get_response_headers(&mut response, &mut remaining, &mut redirect);

        if response.mime_type().is_none() {
            if let Some(mime) = mime_type_from_url(&url) {
                response.set_mime_type(mime);
            }
        }
        response.set_read_only();
        let error_status = response.error().map(NetError::status).filter(RequestStatus::is_terminal_error);

        {
            let mut st = self.lock();
            if st.phase != JobPhase::HeadersPending {
                return;
            }
            st.response = Some(response);
            st.remaining_bytes = remaining;
            st.redirect_url = redirect;
        }

        // A reported error wins over everything else, redirects included
        if let Some(status) = error_status {
            self.finish_with(status);
            return;
        }

        self.save_cookies_and_notify_headers_complete();
    }

    fn save_cookies_and_notify_headers_complete(&self) {
        let save = {
            let mut st = self.lock();
            Self::set_phase(&mut st, JobPhase::SavingCookies);
            let lines = st.response.as_ref().map(ResourceResponse::set_cookie_lines).unwrap_or_default();
            let save = !lines.is_empty() && !st.request.load_flags().contains(LoadFlags::DO_NOT_SAVE_COOKIES);
            st.response_cookies = if save { lines } else { Vec::new() };
            st.cookie_save_index = 0;
            save
        };

        if save {
            self.save_next_cookie();
        } else {
            self.notify_headers_complete();
        }
    }

    /// Saves the cookie at the cursor. Cookies are saved one at a time, in order.
    fn save_next_cookie(&self) {
        loop {
            let (url, line) = {
                let mut st = self.lock();
                if st.phase == JobPhase::Canceled {
                    drop(st);
                    self.notify_canceled();
                    return;
                }
                match st.response_cookies.get(st.cookie_save_index).cloned() {
                    Some(line) => (st.request.url().clone(), line),
                    None => {
                        st.response_cookies.clear();
                        break;
                    }
                }
            };

            let allowed = Cookie::parse(&line, &url).is_some_and(|c| self.handler.can_set_cookie(&c));
            if !allowed {
                log::trace!("not saving cookie line for {}", url);
                self.lock().cookie_save_index += 1;
                continue;
            }

            let me = self.weak_self.clone();
            self.cookie_store.set_cookie_line(
                &url,
                &line,
                Box::new(move |_stored| {
                    if let Some(job) = me.upgrade() {
                        job.cookie_handled();
                    }
                }),
            );
            return;
        }

        self.notify_headers_complete();
    }

    fn cookie_handled(&self) {
        self.lock().cookie_save_index += 1;
        self.save_next_cookie();
    }

    fn notify_headers_complete(&self) {
        {
            let mut st = self.lock();
            if st.phase != JobPhase::SavingCookies {
                return;
            }
            Self::set_phase(&mut st, JobPhase::HeadersComplete);
        }
        self.delegate.on_headers_complete();
    }

    /// Redirect target and status when the response is a redirect. Has no side effects.
    ///
    /// A redirect URL set by the handler wins. Otherwise a 302 or 303 response with a
    /// `Location` header redirects, resolved against the request URL.
    pub fn is_redirect_response(&self) -> Option<(Url, u16)> {
        let st = self.lock();
        let response = st.response.as_ref()?;
        if let Some(url) = &st.redirect_url {
            return Some((url.clone(), 303));
        }
        match response.status() {
            status @ (302 | 303) => {
                let target = st.request.url().join(response.location()?).ok()?;
                Some((target, status))
            }
            _ => None,
        }
    }

    /// Pulls the next chunk of the body into `buf`.
    pub fn read_raw_data(&self, buf: &mut [u8]) -> ReadResult {
        self.assert_on_io("read_raw_data");
        let (capacity, callback) = {
            let mut st = self.lock();
            match st.phase {
                JobPhase::Canceled => return ReadResult::Aborted,
                JobPhase::Done => return ReadResult::Eof,
                JobPhase::HeadersComplete | JobPhase::ReadingBody => {}
                other => panic!("read_raw_data in phase {other:?}"),
            }
            assert!(!st.status.is_io_pending(), "read_raw_data while a read is pending");

            if st.remaining_bytes == 0 {
                drop(st);
                self.done_with_request();
                return ReadResult::Eof;
            }
            Self::set_phase(&mut st, JobPhase::ReadingBody);

            let mut capacity = buf.len();
            if st.remaining_bytes > 0 {
                capacity = capacity.min(usize::try_from(st.remaining_bytes).unwrap_or(usize::MAX));
            }

            let existing = st
                .bytes_callback
                .clone()
                .or_else(|| st.callback.as_ref().and_then(WeakCallback::upgrade))
                .filter(|cb| cb.kind() == CallbackKind::BytesAvailable && cb.is_attached());
            let callback = existing.unwrap_or_else(|| {
                let cb = RequestJobCallback::new(CallbackKind::BytesAvailable, self.io.clone(), self.weak_self.clone());
                st.callback = Some(cb.downgrade());
                cb
            });
            st.bytes_callback = Some(callback.clone());
            (capacity, callback)
        };

        let mut bytes_read = 0;
        if !self.handler.read_response(&mut buf[..capacity], &mut bytes_read, &callback) {
            self.done_with_request();
            return ReadResult::Eof;
        }

        if bytes_read == 0 {
            let held = {
                let mut st = self.lock();
                if st.phase != JobPhase::ReadingBody {
                    return ReadResult::Aborted;
                }
                st.status = RequestStatus::IoPending;
                st.bytes_callback.take()
            };
            callback.set_destination(capacity);
            drop(held);
            return ReadResult::Pending;
        }

        let n = bytes_read.min(capacity);
        let mut st = self.lock();
        st.sent_bytes += n as u64;
        if st.remaining_bytes > 0 {
            st.remaining_bytes -= n as i64;
        }
        ReadResult::Data(n)
    }

    /// Bytes became available for the pending read. Runs from the bytes callback.
    pub(crate) fn resume_read(&self, capacity: usize) {
        self.assert_on_io("resume_read");
        {
            let mut st = self.lock();
            if st.phase != JobPhase::ReadingBody || !st.status.is_io_pending() {
                return;
            }
            st.status = RequestStatus::Success;
        }

        let mut buf = vec![0u8; capacity];
        match self.read_raw_data(&mut buf) {
            ReadResult::Data(n) => {
                buf.truncate(n);
                self.delegate.on_read_complete(buf);
            }
            ReadResult::Eof => self.delegate.on_read_complete(Vec::new()),
            ReadResult::Pending | ReadResult::Aborted => {}
        }
    }

    fn done_with_request(&self) {
        let (sent, callback) = {
            let mut st = self.lock();
            if matches!(st.phase, JobPhase::Done | JobPhase::Canceled) {
                return;
            }
            Self::set_phase(&mut st, JobPhase::Done);
            (st.sent_bytes, Self::detach_callback(&mut st))
        };
        drop(callback);
        self.delegate.record_content_length(sent);
        self.notify_done(RequestStatus::Success);
    }

    /// Cancels the job. The handler hears about it at most once.
    pub fn kill(&self) {
        self.assert_on_io("kill");
        self.cancel_with(RequestStatus::Canceled);
    }

    /// Cancels the job after its handler dropped an armed callback.
    pub(crate) fn abort(&self) {
        self.assert_on_io("abort");
        log::debug!("handler for {} dropped its callback", self.lock().request.url());
        self.cancel_with(NetError::Aborted.status());
    }

    fn finish_with(&self, status: RequestStatus) {
        if status == RequestStatus::Canceled {
            self.cancel_with(status);
            return;
        }

        let callback = {
            let mut st = self.lock();
            if matches!(st.phase, JobPhase::Done | JobPhase::Canceled) {
                return;
            }
            Self::set_phase(&mut st, JobPhase::Done);
            Self::detach_callback(&mut st)
        };
        drop(callback);
        self.notify_done(status);
    }

    fn cancel_with(&self, status: RequestStatus) {
        let (tell_handler, callback) = {
            let mut st = self.lock();
            if st.phase == JobPhase::Done {
                return;
            }
            let tell_handler = !st.handler_canceled;
            st.handler_canceled = true;
            Self::set_phase(&mut st, JobPhase::Canceled);
            (tell_handler, Self::detach_callback(&mut st))
        };

        drop(callback);
        if tell_handler {
            self.handler.cancel();
        }
        self.notify_done(status);
    }

    fn notify_canceled(&self) {
        self.notify_done(RequestStatus::Canceled);
    }

    fn notify_done(&self, status: RequestStatus) {
        {
            let mut st = self.lock();
            if st.notified_done {
                return;
            }
            st.notified_done = true;
            st.status = status;
        }
        self.delegate.on_done(status);
    }
}

impl Drop for ResourceRequestJob {
    fn drop(&mut self) {
        let st = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        let callback = Self::detach_callback(st);
        drop(callback);
        if !matches!(st.phase, JobPhase::Done | JobPhase::Canceled) {
            log::debug!("job {} dropped in phase {:?}", st.request.url(), st.phase);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::cookies::{CookieManager, CookieStoreProxy, ParentCookieSource};
    use crate::engine::ids::ZoneId;
    use crate::engine::test_support::{
        init_logging, io_thread, run_on, wait_until, HandlerCall, RecordingDelegate, ScriptedHandler,
        SequencedCookieStore,
    };
    use http::header::{LOCATION, SET_COOKIE};

    struct Fixture {
        io: Arc<IoThread>,
        cookies: Arc<CookieManager>,
        handler: Arc<ScriptedHandler>,
        delegate: Arc<RecordingDelegate>,
        job: Arc<ResourceRequestJob>,
    }

    fn fixture(request: Request, handler: ScriptedHandler) -> Fixture {
        init_logging();
        let io = io_thread();
        let cookies = CookieManager::new(io.clone(), ZoneId::new(), None);
        let store = Arc::new(CookieStoreProxy::new(io.clone(), Box::new(ParentCookieSource::new(cookies.clone()))));
        let handler = Arc::new(handler);
        let delegate = RecordingDelegate::new();
        let defaults = RequestDefaults {
            user_agent: Some("TestAgent/1.0".into()),
            accept_language: Some("nl".into()),
        };
        let job = ResourceRequestJob::new(io.clone(), request, handler.clone(), delegate.clone(), store, defaults);
        Fixture { io, cookies, handler, delegate, job }
    }

    fn start(f: &Fixture) {
        let job = f.job.clone();
        run_on(&f.io, move || job.start());
    }

    fn read_all(f: &Fixture, chunk: usize) -> (Vec<u8>, usize) {
        let job = f.job.clone();
        run_on(&f.io, move || {
            let mut body = Vec::new();
            let mut eofs = 0;
            let mut buf = vec![0u8; chunk];
            loop {
                match job.read_raw_data(&mut buf) {
                    ReadResult::Data(n) => body.extend_from_slice(&buf[..n]),
                    ReadResult::Eof => {
                        eofs += 1;
                        break;
                    }
                    other => panic!("unexpected {other:?}"),
                }
            }
            (body, eofs)
        })
    }

    fn req(url: &str) -> Request {
        Request::get(url).unwrap()
    }

    #[test]
    fn full_body_in_chunks() {
        let f = fixture(req("widget://app/page"), ScriptedHandler::new(b"0123456789".to_vec()).chunk(3));
        start(&f);
        wait_until(|| f.delegate.headers_complete());

        let (body, eofs) = read_all(&f, 4);
        assert_eq!(body, b"0123456789");
        assert_eq!(eofs, 1);
        assert_eq!(f.delegate.content_length(), Some(10));
        assert_eq!(f.delegate.done(), vec![RequestStatus::Success]);
        assert_eq!(f.job.phase(), JobPhase::Done);
        assert_eq!(f.handler.count(HandlerCall::Cancel), 0);
        assert!(f.handler.count(HandlerCall::ReadResponse) > 1);
        assert!(f.handler.read_callback_reused());
    }

    #[test]
    fn early_false_records_partial_length() {
        let f = fixture(
            req("widget://app/page"),
            ScriptedHandler::new(b"0123456789".to_vec()).chunk(4).stop_after(4),
        );
        start(&f);
        wait_until(|| f.delegate.headers_complete());

        let (body, eofs) = read_all(&f, 16);
        assert_eq!(body, b"0123");
        assert_eq!(eofs, 1);
        assert_eq!(f.delegate.content_length(), Some(4));
    }

    #[test]
    fn zero_remaining_is_immediate_eof() {
        let f = fixture(req("widget://app/empty"), ScriptedHandler::new(Vec::new()));
        start(&f);
        wait_until(|| f.delegate.headers_complete());

        let (body, eofs) = read_all(&f, 16);
        assert!(body.is_empty());
        assert_eq!(eofs, 1);
        assert_eq!(f.handler.count(HandlerCall::ReadResponse), 0);
        assert_eq!(f.delegate.content_length(), Some(0));
    }

    #[test]
    fn unknown_length_reads_until_handler_stops() {
        let f = fixture(req("widget://app/stream"), ScriptedHandler::new(b"abcdef".to_vec()).unknown_length().chunk(2));
        start(&f);
        wait_until(|| f.delegate.headers_complete());

        let (body, eofs) = read_all(&f, 8);
        assert_eq!(body, b"abcdef");
        assert_eq!(eofs, 1);
        assert_eq!(f.delegate.content_length(), Some(6));
    }

    #[test]
    fn pending_read_resumes_through_callback() {
        let f = fixture(req("widget://app/slow"), ScriptedHandler::new(b"hello".to_vec()).async_reads());
        start(&f);
        wait_until(|| f.delegate.headers_complete());

        let job = f.job.clone();
        let first = run_on(&f.io, move || {
            let mut buf = [0u8; 16];
            job.read_raw_data(&mut buf)
        });
        assert_eq!(first, ReadResult::Pending);

        f.handler.release_reads();
        wait_until(|| !f.delegate.reads().is_empty());
        assert_eq!(f.delegate.reads()[0], b"hello".to_vec());

        let (rest, eofs) = read_all(&f, 16);
        assert!(rest.is_empty());
        assert_eq!(eofs, 1);
        assert_eq!(f.delegate.content_length(), Some(5));
    }

    #[test]
    fn dropped_bytes_callback_aborts() {
        let f = fixture(req("widget://app/slow"), ScriptedHandler::new(b"hello".to_vec()).async_reads());
        start(&f);
        wait_until(|| f.delegate.headers_complete());

        let job = f.job.clone();
        let first = run_on(&f.io, move || {
            let mut buf = [0u8; 16];
            job.read_raw_data(&mut buf)
        });
        assert_eq!(first, ReadResult::Pending);

        f.handler.forget_read_callback();
        wait_until(|| !f.delegate.done().is_empty());
        assert_eq!(f.delegate.done(), vec![RequestStatus::Canceled]);
        assert_eq!(f.job.phase(), JobPhase::Canceled);
        assert!(f.delegate.reads().is_empty());
    }

    #[test]
    fn cancel_while_loading_cookies() {
        let f = fixture(req("https://example.com/"), ScriptedHandler::new(Vec::new()));
        let job = f.job.clone();
        let phase = run_on(&f.io, move || {
            job.start();
            let phase = job.phase();
            job.kill();
            phase
        });
        assert_eq!(phase, JobPhase::LoadingCookies);

        // Let the cookie lookup complete
        for _ in 0..10 {
            run_on(&f.io, || ());
        }
        assert_eq!(f.handler.count(HandlerCall::ProcessRequest), 0);
        assert_eq!(f.handler.count(HandlerCall::Cancel), 1);
        assert_eq!(f.delegate.done(), vec![RequestStatus::Canceled]);
        assert_eq!(f.job.phase(), JobPhase::Canceled);
    }

    #[test]
    fn cancel_reaches_handler_once() {
        let f = fixture(req("widget://app/page"), ScriptedHandler::new(b"body".to_vec()).hold_headers());
        start(&f);
        wait_until(|| f.handler.count(HandlerCall::ProcessRequest) == 1);

        let job = f.job.clone();
        run_on(&f.io, move || {
            job.kill();
            job.kill();
            job.kill();
        });
        f.handler.release_headers();

        let job = f.job.clone();
        run_on(&f.io, move || job.kill());
        assert_eq!(f.handler.count(HandlerCall::Cancel), 1);
        assert_eq!(f.delegate.done(), vec![RequestStatus::Canceled]);
        assert!(!f.delegate.headers_complete());
        assert_eq!(f.job.phase(), JobPhase::Canceled);
    }

    #[test]
    fn cancel_after_done_does_not_reach_handler() {
        let f = fixture(req("widget://app/page"), ScriptedHandler::new(b"x".to_vec()));
        start(&f);
        wait_until(|| f.delegate.headers_complete());
        read_all(&f, 8);

        let job = f.job.clone();
        run_on(&f.io, move || job.kill());
        assert_eq!(f.handler.count(HandlerCall::Cancel), 0);
        assert_eq!(f.delegate.done(), vec![RequestStatus::Success]);
    }

    #[test]
    fn declined_request_is_canceled() {
        let f = fixture(req("widget://app/page"), ScriptedHandler::new(Vec::new()).decline());
        start(&f);
        wait_until(|| !f.delegate.done().is_empty());
        assert_eq!(f.delegate.done(), vec![RequestStatus::Canceled]);
        assert_eq!(f.handler.count(HandlerCall::Cancel), 1);
    }

    #[test]
    fn dropped_headers_callback_aborts() {
        let f = fixture(req("widget://app/page"), ScriptedHandler::new(Vec::new()).drop_callback());
        start(&f);
        wait_until(|| !f.delegate.done().is_empty());
        assert_eq!(f.delegate.done(), vec![RequestStatus::Canceled]);
    }

    #[test]
    fn reported_error_wins_over_redirect() {
        let f = fixture(
            req("widget://app/page"),
            ScriptedHandler::new(Vec::new())
                .redirect_to("widget://app/other")
                .error(NetError::FileNotFound),
        );
        start(&f);
        wait_until(|| !f.delegate.done().is_empty());
        assert_eq!(f.delegate.done(), vec![RequestStatus::Failed(NetError::FileNotFound)]);
        assert!(!f.delegate.headers_complete());
        assert_eq!(f.handler.count(HandlerCall::Cancel), 0);
    }

    #[test]
    fn redirect_detection() {
        let f = fixture(req("widget://app/dir/page"), ScriptedHandler::new(Vec::new()).status(302).header(LOCATION, "../moved"));
        start(&f);
        wait_until(|| f.delegate.headers_complete());
        let expected = Url::parse("widget://app/moved").unwrap();
        assert_eq!(f.job.is_redirect_response(), Some((expected.clone(), 302)));
        // No side effects
        assert_eq!(f.job.is_redirect_response(), Some((expected, 302)));

        let f = fixture(req("widget://app/page"), ScriptedHandler::new(Vec::new()).redirect_to("widget://app/explicit"));
        start(&f);
        wait_until(|| f.delegate.headers_complete());
        assert_eq!(f.job.is_redirect_response(), Some((Url::parse("widget://app/explicit").unwrap(), 303)));

        let f = fixture(req("widget://app/page"), ScriptedHandler::new(Vec::new()).status(301).header(LOCATION, "/x"));
        start(&f);
        wait_until(|| f.delegate.headers_complete());
        assert_eq!(f.job.is_redirect_response(), None);
    }

    #[test]
    fn defaults_fill_missing_headers_only() {
        let request = req("widget://app/page").with_header(USER_AGENT, HeaderValue::from_static("Own/2.0"));
        let f = fixture(request, ScriptedHandler::new(Vec::new()));
        start(&f);
        wait_until(|| f.delegate.headers_complete());

        let seen = f.handler.last_request().unwrap();
        assert_eq!(seen.header_str(&USER_AGENT), Some("Own/2.0"));
        assert_eq!(seen.header_str(&ACCEPT_LANGUAGE), Some("nl"));
        assert!(seen.is_read_only());
    }

    #[test]
    fn mime_inferred_from_extension() {
        let f = fixture(req("widget://app/site.css"), ScriptedHandler::new(Vec::new()));
        start(&f);
        wait_until(|| f.delegate.headers_complete());
        assert_eq!(f.job.response().unwrap().mime_type(), Some("text/css"));

        let f = fixture(req("widget://app/site.css"), ScriptedHandler::new(Vec::new()).mime("text/plain"));
        start(&f);
        wait_until(|| f.delegate.headers_complete());
        assert_eq!(f.job.response().unwrap().mime_type(), Some("text/plain"));
    }

    fn set_cookie_handler() -> ScriptedHandler {
        ScriptedHandler::new(Vec::new())
            .header(SET_COOKIE, "a=1; Path=/")
            .header(SET_COOKIE, "b=2; Path=/")
            .header(SET_COOKIE, "c=3; Path=/")
    }

    #[test]
    fn response_cookies_saved_in_order_then_sent() {
        let f = fixture(req("https://example.com/login"), set_cookie_handler().refuse_set("b"));
        start(&f);
        wait_until(|| f.delegate.headers_complete());

        let (tx, rx) = std::sync::mpsc::channel();
        f.cookies.visit_all_cookies(move |all| tx.send(all).unwrap());
        let mut names: Vec<String> = crate::engine::test_support::recv(&rx).into_iter().map(|c| c.name).collect();
        names.sort();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(f.handler.set_cookie_checks(), vec!["a", "b", "c"]);

        // A second job for the same site sends them
        let store = Arc::new(CookieStoreProxy::new(f.io.clone(), Box::new(ParentCookieSource::new(f.cookies.clone()))));
        let handler = Arc::new(ScriptedHandler::new(Vec::new()));
        let delegate = RecordingDelegate::new();
        let job = ResourceRequestJob::new(
            f.io.clone(),
            req("https://example.com/home"),
            handler.clone(),
            delegate.clone(),
            store,
            RequestDefaults::default(),
        );
        let starter = job.clone();
        run_on(&f.io, move || starter.start());
        wait_until(|| delegate.headers_complete());
        let cookie = handler.last_request().unwrap().header_str(&COOKIE).map(str::to_string).unwrap();
        let mut pairs: Vec<&str> = cookie.split("; ").collect();
        pairs.sort();
        assert_eq!(pairs, vec!["a=1", "c=3"]);
    }

    #[test]
    fn cookie_saves_are_sequential() {
        let f = fixture(req("https://example.com/"), ScriptedHandler::new(Vec::new()));
        let store = SequencedCookieStore::new(f.io.clone(), Box::new(ParentCookieSource::new(f.cookies.clone())));
        let delegate = RecordingDelegate::new();
        let job = ResourceRequestJob::new(
            f.io.clone(),
            req("https://example.com/"),
            Arc::new(set_cookie_handler()),
            delegate.clone(),
            store.clone(),
            RequestDefaults::default(),
        );
        let starter = job.clone();
        run_on(&f.io, move || starter.start());
        wait_until(|| delegate.headers_complete());

        assert_eq!(store.lines(), vec!["a=1; Path=/", "b=2; Path=/", "c=3; Path=/"]);
        assert!(!store.overlapped());
        assert_eq!(job.phase(), JobPhase::HeadersComplete);
    }

    #[test]
    fn cancel_between_cookie_saves_aborts() {
        let f = fixture(req("https://example.com/"), ScriptedHandler::new(Vec::new()));
        let store = SequencedCookieStore::new(f.io.clone(), Box::new(ParentCookieSource::new(f.cookies.clone())));
        store.hold_saves();
        let handler = Arc::new(set_cookie_handler());
        let delegate = RecordingDelegate::new();
        let job = ResourceRequestJob::new(
            f.io.clone(),
            req("https://example.com/"),
            handler.clone(),
            delegate.clone(),
            store.clone(),
            RequestDefaults::default(),
        );
        let starter = job.clone();
        run_on(&f.io, move || starter.start());
        wait_until(|| store.has_held_save());
        assert_eq!(job.phase(), JobPhase::SavingCookies);

        let killer = job.clone();
        run_on(&f.io, move || killer.kill());
        let held = store.clone();
        run_on(&f.io, move || held.release_save());
        wait_until(|| !store.saving());
        run_on(&f.io, || ());

        assert_eq!(store.lines(), vec!["a=1; Path=/"]);
        assert_eq!(handler.set_cookie_checks(), vec!["a"]);
        assert_eq!(delegate.done(), vec![RequestStatus::Canceled]);
        assert!(!delegate.headers_complete());
        assert_eq!(handler.count(HandlerCall::Cancel), 1);
        assert_eq!(job.phase(), JobPhase::Canceled);
    }

    #[test]
    fn do_not_save_cookies_skips_store() {
        let request = req("https://example.com/").with_load_flags(LoadFlags::DO_NOT_SAVE_COOKIES);
        let f = fixture(request, set_cookie_handler());
        start(&f);
        wait_until(|| f.delegate.headers_complete());
        assert!(f.handler.set_cookie_checks().is_empty());

        let (tx, rx) = std::sync::mpsc::channel();
        f.cookies.visit_all_cookies(move |all| tx.send(all).unwrap());
        assert!(crate::engine::test_support::recv(&rx).is_empty());
    }

    #[test]
    fn do_not_send_cookies_skips_loading() {
        let request = req("https://example.com/").with_load_flags(LoadFlags::DO_NOT_SEND_COOKIES);
        let f = fixture(request, ScriptedHandler::new(Vec::new()));
        let (tx, rx) = std::sync::mpsc::channel();
        let url = Url::parse("https://example.com/").unwrap();
        f.cookies.set_cookie(&url, &Cookie::parse("s=1", &url).unwrap(), Some(Box::new(move |ok| tx.send(ok).unwrap())));
        assert!(crate::engine::test_support::recv(&rx));

        start(&f);
        wait_until(|| f.delegate.headers_complete());
        assert!(f.handler.last_request().unwrap().header_str(&COOKIE).is_none());
        assert_eq!(f.handler.count(HandlerCall::CanGetCookie), 0);
    }

    #[test]
    fn refused_cookie_blocks_cookie_header() {
        let f = fixture(req("https://example.com/"), ScriptedHandler::new(Vec::new()).refuse_get());
        let (tx, rx) = std::sync::mpsc::channel();
        let url = Url::parse("https://example.com/").unwrap();
        f.cookies.set_cookie(&url, &Cookie::parse("s=1", &url).unwrap(), Some(Box::new(move |ok| tx.send(ok).unwrap())));
        assert!(crate::engine::test_support::recv(&rx));

        start(&f);
        wait_until(|| f.delegate.headers_complete());
        assert!(f.handler.last_request().unwrap().header_str(&COOKIE).is_none());
        assert_eq!(f.handler.count(HandlerCall::CanGetCookie), 1);
    }

    #[test]
    #[should_panic(expected = "off the I/O thread")]
    fn off_thread_start_is_fatal() {
        let f = fixture(req("widget://app/"), ScriptedHandler::new(Vec::new()));
        f.job.start();
    }
}
