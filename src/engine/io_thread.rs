//! The designated I/O thread.
//!
//! Every piece of request-layer state (the scheme registry, resource jobs, request
//! contexts and their proxies) is affine to one thread. Instead of guarding that state
//! with locks that are taken from anywhere, callers on other threads post a task onto
//! this thread and the state is only ever touched from here.
//!
//! The thread runs a current-thread tokio runtime. Posted tasks are plain closures and
//! run in FIFO order; futures spawned with [`IoThread::spawn_future`] are driven by the
//! same runtime in between tasks.

use crate::engine::errors::EngineError;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{JoinHandle, ThreadId};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

type Task = Box<dyn FnOnce() + Send + 'static>;

pub struct IoThread {
    name: String,
    thread_id: ThreadId,
    /// Task sender. Taken (and thereby closed) on shutdown.
    tx: Mutex<Option<mpsc::UnboundedSender<Task>>>,
    /// Runtime handle, used for spawning futures onto the thread
    handle: Handle,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for IoThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoThread")
            .field("name", &self.name)
            .field("thread_id", &self.thread_id)
            .finish_non_exhaustive()
    }
}

impl IoThread {
    /// Starts a new I/O thread with the given name.
    pub fn spawn(name: &str) -> Result<Arc<Self>, EngineError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<std::io::Result<Handle>>();

        let thread_name = name.to_string();
        let join = std::thread::Builder::new().name(name.to_string()).spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(runtime.handle().clone()));

            runtime.block_on(async move {
                while let Some(task) = rx.recv().await {
                    task();
                }
            });
            log::debug!("I/O thread '{}' stopped", thread_name);
        })?;

        let handle = ready_rx.recv().map_err(|_| EngineError::IoThreadGone)??;
        let thread_id = join.thread().id();

        Ok(Arc::new(Self {
            name: name.to_string(),
            thread_id,
            tx: Mutex::new(Some(tx)),
            handle,
            join: Mutex::new(Some(join)),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true when the caller runs on this I/O thread.
    #[inline]
    pub fn currently_on(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Queues `task` for execution on the I/O thread. The task never runs inline, even
    /// when called from the I/O thread itself. Returns false when the thread is gone.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => tx.send(Box::new(task)).is_ok(),
            None => false,
        }
    }

    /// Spawns a future on the I/O thread's runtime.
    pub fn spawn_future<F>(&self, fut: F) -> tokio::task::AbortHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(fut).abort_handle()
    }

    /// Stops accepting tasks, lets the queued ones drain and joins the thread. When called
    /// from the I/O thread itself the join is skipped.
    pub fn shutdown(&self) {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        if tx.is_none() {
            return;
        }
        drop(tx);

        if self.currently_on() {
            return;
        }
        let join = self.join.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(join) = join {
            if join.join().is_err() {
                log::error!("I/O thread '{}' panicked", self.name);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}

impl Drop for IoThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}
