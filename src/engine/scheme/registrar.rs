use crate::engine::io_thread::IoThread;
use crate::engine::scheme::{HandlerRegistry, SchemeHandlerFactory};
use std::sync::{Arc, Mutex, PoisonError};

/// Thread-safe front of the [`HandlerRegistry`].
///
/// Calls made off the I/O thread are posted onto it and return whether the post
/// succeeded. Requests started afterwards observe the change, since the I/O thread runs
/// tasks in order.
#[derive(Clone)]
pub struct SchemeRegistrar {
    io: Arc<IoThread>,
    registry: Arc<Mutex<HandlerRegistry>>,
}

impl SchemeRegistrar {
    pub(crate) fn new(io: Arc<IoThread>, registry: Arc<Mutex<HandlerRegistry>>) -> Self {
        Self { io, registry }
    }

    /// Registers `factory` for `scheme` and `domain`. `None` removes the registration.
    pub fn register_scheme_handler_factory(
        &self,
        scheme: &str,
        domain: &str,
        factory: Option<Arc<dyn SchemeHandlerFactory>>,
    ) -> bool {
        let (scheme, domain) = (scheme.to_string(), domain.to_string());
        self.run(move |r| r.add_factory(&scheme, &domain, factory))
    }

    pub fn clear_scheme_handler_factories(&self) -> bool {
        self.run(|r| r.clear_factories())
    }

    pub fn register_standard_scheme(&self, scheme: &str) -> bool {
        let scheme = scheme.to_string();
        self.run(move |r| r.register_standard_scheme(&scheme))
    }

    fn run(&self, f: impl FnOnce(&mut HandlerRegistry) -> bool + Send + 'static) -> bool {
        if self.io.currently_on() {
            return f(&mut self.registry.lock().unwrap_or_else(PoisonError::into_inner));
        }
        let registry = self.registry.clone();
        let posted = self.io.post(move || {
            f(&mut registry.lock().unwrap_or_else(PoisonError::into_inner));
        });
        if !posted {
            log::warn!("scheme registration dropped: I/O thread '{}' stopped", self.io.name());
        }
        posted
    }
}
