use crate::engine::io_thread::IoThread;
use crate::engine::resource::ResourceRequestJob;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// What a [`RequestJobCallback`] resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    /// The response headers are available.
    HeadersAvailable,
    /// Body bytes are available for a pending read.
    BytesAvailable,
}

#[derive(Debug)]
struct CallbackState {
    /// Owning job. `None` once detached.
    job: Option<Weak<ResourceRequestJob>>,
    /// Headers mode: `resume` was already called.
    continued: bool,
    /// Bytes mode: capacity of the pending read, set once per wait.
    destination: Option<usize>,
}

struct CallbackInner {
    kind: CallbackKind,
    io: Arc<IoThread>,
    state: Mutex<CallbackState>,
}

impl CallbackInner {
    fn lock(&self) -> MutexGuard<'_, CallbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Continuation handed to a [`ResourceHandler`](crate::engine::resource::ResourceHandler).
///
/// Cloning is cheap; all clones share one state. The callback is either attached to its
/// job or detached, and detaching is final: once the job is gone, canceled or the
/// continuation has been consumed, `resume` and `cancel` do nothing.
#[derive(Clone)]
pub struct RequestJobCallback {
    inner: Arc<CallbackInner>,
}

impl std::fmt::Debug for RequestJobCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestJobCallback")
            .field("kind", &self.inner.kind)
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl RequestJobCallback {
    pub(crate) fn new(kind: CallbackKind, io: Arc<IoThread>, job: Weak<ResourceRequestJob>) -> Self {
        Self {
            inner: Arc::new(CallbackInner {
                kind,
                io,
                state: Mutex::new(CallbackState {
                    job: Some(job),
                    continued: false,
                    destination: None,
                }),
            }),
        }
    }

    pub fn kind(&self) -> CallbackKind {
        self.inner.kind
    }

    pub fn is_attached(&self) -> bool {
        self.inner.lock().job.is_some()
    }

    /// Resumes the job. Always runs later on the I/O thread, never inline.
    pub fn resume(&self) {
        {
            let mut st = self.inner.lock();
            if st.job.is_none() {
                return;
            }
            if self.inner.kind == CallbackKind::HeadersAvailable {
                if st.continued {
                    return;
                }
                st.continued = true;
            }
        }

        let inner = self.inner.clone();
        if !self.inner.io.post(move || resume_on_io(&inner)) {
            log::warn!("dropping job continuation: I/O thread '{}' stopped", self.inner.io.name());
        }
    }

    /// Cancels the job. Always runs later on the I/O thread, never inline.
    pub fn cancel(&self) {
        let Some(job) = self.inner.lock().job.clone() else {
            return;
        };
        let posted = self.inner.io.post(move || {
            if let Some(job) = job.upgrade() {
                job.kill();
            }
        });
        if !posted {
            log::warn!("dropping job cancellation: I/O thread '{}' stopped", self.inner.io.name());
        }
    }

    /// Latches the capacity of a pending read.
    ///
    /// # Panics
    /// When a previous destination has not been consumed yet, or on a headers callback.
    pub(crate) fn set_destination(&self, capacity: usize) {
        assert_eq!(self.inner.kind, CallbackKind::BytesAvailable, "destination on a headers callback");
        let mut st = self.inner.lock();
        assert!(st.destination.is_none(), "read destination set while one is still pending");
        st.destination = Some(capacity);
    }

    pub(crate) fn detach(&self) {
        let mut st = self.inner.lock();
        st.job = None;
        st.destination = None;
    }

    pub(crate) fn downgrade(&self) -> WeakCallback {
        WeakCallback(Arc::downgrade(&self.inner))
    }
}

fn resume_on_io(inner: &Arc<CallbackInner>) {
    let (job, destination) = {
        let mut st = inner.lock();
        let job = st.job.as_ref().and_then(Weak::upgrade);
        match inner.kind {
            CallbackKind::HeadersAvailable => {
                // Consumed: the job creates a new callback for body reads
                st.job = None;
                (job, None)
            }
            CallbackKind::BytesAvailable => (job, st.destination.take()),
        }
    };

    let Some(job) = job else {
        return;
    };
    match inner.kind {
        CallbackKind::HeadersAvailable => job.send_headers(),
        CallbackKind::BytesAvailable => match destination {
            Some(capacity) => job.resume_read(capacity),
            None => log::trace!("bytes continuation without a pending read"),
        },
    }
}

impl Drop for CallbackInner {
    fn drop(&mut self) {
        let st = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        let armed = match self.kind {
            CallbackKind::HeadersAvailable => !st.continued,
            CallbackKind::BytesAvailable => st.destination.is_some(),
        };
        let Some(job) = st.job.take() else {
            return;
        };
        if !armed {
            return;
        }

        // The handler dropped its continuation without answering
        let posted = self.io.post(move || {
            if let Some(job) = job.upgrade() {
                job.abort();
            }
        });
        if !posted {
            log::warn!("dropping job abort: I/O thread '{}' stopped", self.io.name());
        }
    }
}

/// Non-owning reference a job keeps to its live callback.
#[derive(Clone)]
pub(crate) struct WeakCallback(Weak<CallbackInner>);

impl WeakCallback {
    pub(crate) fn upgrade(&self) -> Option<RequestJobCallback> {
        self.0.upgrade().map(|inner| RequestJobCallback { inner })
    }

    pub(crate) fn detach(&self) {
        if let Some(cb) = self.upgrade() {
            cb.detach();
        }
    }
    #[cfg(test)]
    pub(crate) fn ptr_eq(&self, other: &WeakCallback) -> bool {
        Weak::ptr_eq(&self.0, &other.0)
    }
}
