use crate::engine::config::NetConfig;
use crate::engine::context::{NetworkPrimitives, RequestContext};
use crate::engine::cookies::CookieManager;
use crate::engine::errors::EngineError;
use crate::engine::ids::ZoneId;
use crate::engine::io_thread::IoThread;
use crate::engine::scheme::{HandlerRegistry, SchemeRegistrar};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockWriteGuard};

/// Owns the designated I/O thread and every request context running on it.
///
/// ```no_run
/// # use gosub_net::engine::NetworkService;
/// # use gosub_net::net::Request;
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let service = NetworkService::new(None)?;
/// let response = service.global_context().fetch(Request::get("gosub://version")?).await?;
/// println!("{}", response.text());
/// service.shutdown();
/// # Ok(()) }
/// ```
pub struct NetworkService {
    /// Configuration the service was started with.
    config: Arc<NetConfig>,
    shared: Arc<NetworkPrimitives>,
    global: Arc<RequestContext>,
    /// Per-zone contexts, indexed by [`ZoneId`].
    contexts: RwLock<HashMap<ZoneId, Arc<RequestContext>>>,
}

impl NetworkService {
    /// Starts the service.
    ///
    /// If `config` is `None`, [`NetConfig::default`] is used.
    pub fn new(config: Option<NetConfig>) -> Result<Self, EngineError> {
        let config = config.unwrap_or_default();
        config.validate()?;

        let io = IoThread::spawn(&config.io_thread_name)?;
        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        let registry = HandlerRegistry::new(io.clone(), &config.standard_schemes, &config.user_agent);

        let shared = Arc::new(NetworkPrimitives {
            io: io.clone(),
            registry: Arc::new(Mutex::new(registry)),
            http_client,
            defaults: config.request_defaults(),
            read_buffer_size: config.read_buffer_size,
        });

        let cookies = CookieManager::new(io, ZoneId::global(), config.cookie_store_path.clone());
        let global = RequestContext::new(ZoneId::global(), shared.clone(), cookies);
        log::debug!("network service started on I/O thread '{}'", config.io_thread_name);

        Ok(Self {
            config: Arc::new(config),
            shared,
            global,
            contexts: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn io_thread(&self) -> Arc<IoThread> {
        self.shared.io.clone()
    }

    /// Registration front for scheme handler factories, usable from any thread.
    pub fn registrar(&self) -> SchemeRegistrar {
        SchemeRegistrar::new(self.shared.io.clone(), self.shared.registry.clone())
    }

    pub fn global_context(&self) -> Arc<RequestContext> {
        self.global.clone()
    }

    fn contexts(&self) -> RwLockWriteGuard<'_, HashMap<ZoneId, Arc<RequestContext>>> {
        self.contexts.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates the context of `zone_id`. Its cookies are kept in a JSON file at
    /// `cookie_path`, or in memory when `None`.
    pub fn create_context(&self, zone_id: ZoneId, cookie_path: Option<PathBuf>) -> Result<Arc<RequestContext>, EngineError> {
        let mut contexts = self.contexts();
        if zone_id == ZoneId::global() || contexts.contains_key(&zone_id) {
            return Err(EngineError::ZoneAlreadyExists);
        }
        if !self.shared.io.is_running() {
            return Err(EngineError::IoThreadGone);
        }

        let cookies = CookieManager::new(self.shared.io.clone(), zone_id, cookie_path);
        let context = RequestContext::new(zone_id, self.shared.clone(), cookies);
        contexts.insert(zone_id, context.clone());
        log::debug!("created request context for zone {}", zone_id);
        Ok(context)
    }

    pub fn context(&self, zone_id: ZoneId) -> Option<Arc<RequestContext>> {
        if zone_id == ZoneId::global() {
            return Some(self.global.clone());
        }
        self.contexts.read().unwrap_or_else(PoisonError::into_inner).get(&zone_id).cloned()
    }

    /// Shuts the context of `zone_id` down and forgets it.
    pub fn remove_context(&self, zone_id: ZoneId) -> bool {
        let Some(context) = self.contexts().remove(&zone_id) else {
            return false;
        };
        context.shutdown();
        true
    }

    /// Shuts every context down, then stops the I/O thread once the queued work ran.
    pub fn shutdown(&self) {
        let contexts: Vec<_> = self.contexts().drain().map(|(_, c)| c).collect();
        for context in contexts.iter().chain(std::iter::once(&self.global)) {
            context.shutdown();
        }
        self.shared.io.shutdown();
        log::debug!("network service stopped");
    }
}

impl Drop for NetworkService {
    fn drop(&mut self) {
        if self.shared.io.is_running() {
            self.shutdown();
        }
    }
}
