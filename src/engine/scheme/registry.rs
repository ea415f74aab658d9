use crate::engine::config::is_valid_scheme;
use crate::engine::io_thread::IoThread;
use crate::engine::scheme::{
    InternalSchemeFactory, SchemeHandlerFactory, BUILTIN_SCHEMES, DEFAULT_STANDARD_SCHEMES, INTERNAL_PROTECTED_SCHEMES,
    INTERNAL_SCHEME,
};
use crate::net::Request;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use url::Url;

/// Registry key. The domain is empty for non-standard schemes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SchemeKey {
    scheme: String,
    domain: String,
}

/// Tracks for which schemes the low-level protocol hook is installed.
#[derive(Debug, Default)]
struct ProtocolHookTable {
    installed: HashSet<String>,
}

impl ProtocolHookTable {
    fn is_protected(scheme: &str) -> bool {
        INTERNAL_PROTECTED_SCHEMES.contains(&scheme)
    }

    fn install(&mut self, scheme: &str) {
        if Self::is_protected(scheme) {
            return;
        }
        if self.installed.insert(scheme.to_string()) {
            log::debug!("protocol hook installed for '{}'", scheme);
        }
    }

    fn uninstall(&mut self, scheme: &str) {
        if Self::is_protected(scheme) {
            return;
        }
        if self.installed.remove(scheme) {
            log::debug!("protocol hook removed for '{}'", scheme);
        }
    }

    fn contains(&self, scheme: &str) -> bool {
        self.installed.contains(scheme)
    }
}

/// Who services a request.
#[derive(Clone)]
pub enum Route {
    /// A registered factory. When it passes and `builtin_fallback` is set, the built-in
    /// engine job takes over.
    Factory {
        factory: Arc<dyn SchemeHandlerFactory>,
        builtin_fallback: bool,
    },
    /// No factory matched, the engine loads the scheme itself.
    BuiltIn,
    /// Nobody can load the request.
    Unhandled,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Route::Factory { builtin_fallback, .. } => f
                .debug_struct("Factory")
                .field("builtin_fallback", builtin_fallback)
                .finish_non_exhaustive(),
            Route::BuiltIn => write!(f, "BuiltIn"),
            Route::Unhandled => write!(f, "Unhandled"),
        }
    }
}

/// Maps `(scheme, domain)` onto scheme handler factories.
///
/// Mutations are only accepted on the I/O thread. Calls from anywhere else are logged
/// and rejected; use a [`SchemeRegistrar`](crate::engine::scheme::SchemeRegistrar) to
/// register from other threads.
pub struct HandlerRegistry {
    io: Arc<IoThread>,
    standard_schemes: HashSet<String>,
    factories: HashMap<SchemeKey, Arc<dyn SchemeHandlerFactory>>,
    hooks: ProtocolHookTable,
    user_agent: String,
}

impl HandlerRegistry {
    /// Creates a registry with the built-in internal handlers installed. `standard`
    /// lists custom schemes that use authority syntax.
    pub fn new(io: Arc<IoThread>, standard: &[String], user_agent: &str) -> Self {
        let standard_schemes = DEFAULT_STANDARD_SCHEMES
            .iter()
            .map(|s| s.to_string())
            .chain(standard.iter().map(|s| s.to_ascii_lowercase()))
            .collect();

        let mut registry = Self {
            io,
            standard_schemes,
            factories: HashMap::new(),
            hooks: ProtocolHookTable::default(),
            user_agent: user_agent.to_string(),
        };
        registry.install_internal_handlers();
        registry
    }

    fn on_io(&self, op: &str) -> bool {
        if self.io.currently_on() {
            return true;
        }
        log::error!("HandlerRegistry::{} called off the I/O thread; ignored", op);
        false
    }

    fn key(&self, scheme: &str, domain: &str) -> SchemeKey {
        let scheme = scheme.to_ascii_lowercase();
        let domain = if self.standard_schemes.contains(&scheme) {
            domain.to_ascii_lowercase()
        } else {
            String::new()
        };
        SchemeKey { scheme, domain }
    }

    fn install_internal_handlers(&mut self) {
        let factory: Arc<dyn SchemeHandlerFactory> = Arc::new(InternalSchemeFactory::new(&self.user_agent));
        let key = self.key(INTERNAL_SCHEME, "");
        self.hooks.install(&key.scheme);
        self.factories.insert(key, factory);
    }

    /// Marks `scheme` as using `scheme://host/path` syntax, so registrations for it
    /// can be scoped to a domain.
    pub fn register_standard_scheme(&mut self, scheme: &str) -> bool {
        if !self.on_io("register_standard_scheme") {
            return false;
        }
        if !is_valid_scheme(scheme) {
            log::error!("'{}' is not a valid scheme name", scheme);
            return false;
        }
        self.standard_schemes.insert(scheme.to_ascii_lowercase());
        true
    }

    pub fn is_standard_scheme(&self, scheme: &str) -> bool {
        self.standard_schemes.contains(&scheme.to_ascii_lowercase())
    }

    /// Registers `factory` for `scheme` and `domain`, replacing any earlier one. An
    /// empty domain matches every host. `None` removes the registration.
    pub fn add_factory(&mut self, scheme: &str, domain: &str, factory: Option<Arc<dyn SchemeHandlerFactory>>) -> bool {
        if !self.on_io("add_factory") {
            return false;
        }
        let Some(factory) = factory else {
            return self.remove_factory(scheme, domain);
        };
        if !is_valid_scheme(scheme) {
            log::error!("'{}' is not a valid scheme name", scheme);
            return false;
        }

        let key = self.key(scheme, domain);
        self.hooks.install(&key.scheme);
        log::debug!("registering scheme handler factory for '{}' (domain '{}')", key.scheme, key.domain);
        self.factories.insert(key, factory);
        true
    }

    pub fn remove_factory(&mut self, scheme: &str, domain: &str) -> bool {
        if !self.on_io("remove_factory") {
            return false;
        }
        let key = self.key(scheme, domain);
        if self.factories.remove(&key).is_some() {
            log::debug!("removed scheme handler factory for '{}' (domain '{}')", key.scheme, key.domain);
        }
        if !self.factories.keys().any(|k| k.scheme == key.scheme) {
            self.hooks.uninstall(&key.scheme);
        }
        true
    }

    /// Removes every registration, then restores the built-in internal handlers.
    pub fn clear_factories(&mut self) -> bool {
        if !self.on_io("clear_factories") {
            return false;
        }
        let schemes: HashSet<String> = self.factories.drain().map(|(k, _)| k.scheme).collect();
        for scheme in &schemes {
            self.hooks.uninstall(scheme);
        }
        log::debug!("cleared scheme handler factories for {} scheme(s)", schemes.len());
        self.install_internal_handlers();
        true
    }

    /// The factory servicing `url`, if any. For standard schemes the host-specific
    /// registration wins over the domain-less one.
    pub fn resolve(&self, url: &Url) -> Option<Arc<dyn SchemeHandlerFactory>> {
        let scheme = url.scheme();
        if self.is_standard_scheme(scheme) {
            if let Some(host) = url.host_str().filter(|h| !h.is_empty()) {
                if let Some(factory) = self.factories.get(&self.key(scheme, host)) {
                    return Some(factory.clone());
                }
            }
        }
        let found = self.factories.get(&self.key(scheme, "")).cloned();
        if found.is_none() {
            log::trace!("no scheme handler factory for {}", url);
        }
        found
    }

    pub fn route(&self, request: &Request) -> Route {
        let builtin = BUILTIN_SCHEMES.contains(&request.scheme());
        match self.resolve(request.url()) {
            Some(factory) => Route::Factory {
                factory,
                builtin_fallback: builtin,
            },
            None if builtin => Route::BuiltIn,
            None => Route::Unhandled,
        }
    }

    /// True when the protocol hook for `scheme` is installed.
    pub fn has_hook(&self, scheme: &str) -> bool {
        self.hooks.contains(&scheme.to_ascii_lowercase())
    }

    pub fn factory_count(&self) -> usize {
        self.factories.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ids::{FrameId, TabId};
    use crate::engine::resource::ResourceHandler;
    use crate::engine::test_support::{init_logging, io_thread, run_on};
    use std::sync::Mutex;

    /// Records the scheme of every `create` call under its own name.
    struct NamedFactory {
        name: &'static str,
        calls: Arc<Mutex<Vec<(&'static str, String)>>>,
    }

    impl SchemeHandlerFactory for NamedFactory {
        fn create(&self, _: Option<TabId>, _: Option<FrameId>, scheme: &str, _: &Request) -> Option<Arc<dyn ResourceHandler>> {
            self.calls.lock().unwrap().push((self.name, scheme.to_string()));
            None
        }
    }

    type Calls = Arc<Mutex<Vec<(&'static str, String)>>>;

    fn named(name: &'static str, calls: &Calls) -> Arc<dyn SchemeHandlerFactory> {
        Arc::new(NamedFactory {
            name,
            calls: calls.clone(),
        })
    }

    fn registry(standard: &[&str]) -> (Arc<IoThread>, Arc<Mutex<HandlerRegistry>>) {
        init_logging();
        let io = io_thread();
        let standard: Vec<String> = standard.iter().map(|s| s.to_string()).collect();
        let registry = HandlerRegistry::new(io.clone(), &standard, "TestAgent/1.0");
        (io, Arc::new(Mutex::new(registry)))
    }

    fn with<R: Send + 'static>(
        io: &Arc<IoThread>,
        registry: &Arc<Mutex<HandlerRegistry>>,
        f: impl FnOnce(&mut HandlerRegistry) -> R + Send + 'static,
    ) -> R {
        let registry = registry.clone();
        run_on(io, move || f(&mut registry.lock().unwrap()))
    }

    /// Calls the factory resolved for `url` and returns which one answered.
    fn who(registry: &Arc<Mutex<HandlerRegistry>>, calls: &Calls, url: &str) -> Option<&'static str> {
        let request = Request::get(url).unwrap();
        let factory = registry.lock().unwrap().resolve(request.url())?;
        factory.create(None, None, request.scheme(), &request);
        calls.lock().unwrap().pop().map(|(name, _)| name)
    }

    #[test]
    fn host_registration_beats_fallback() {
        let (io, reg) = registry(&["widget"]);
        let calls = Calls::default();
        let (host, any) = (named("host", &calls), named("any", &calls));
        assert!(with(&io, &reg, move |r| r.add_factory("widget", "app", Some(host)) && r.add_factory("widget", "", Some(any))));

        assert_eq!(who(&reg, &calls, "widget://app/page"), Some("host"));
        assert_eq!(who(&reg, &calls, "widget://APP/page"), Some("host"));
        assert_eq!(who(&reg, &calls, "widget://other/page"), Some("any"));
    }

    #[test]
    fn domain_scoped_registration_does_not_leak() {
        let (io, reg) = registry(&["widget"]);
        let calls = Calls::default();
        let f = named("f", &calls);
        assert!(with(&io, &reg, move |r| r.add_factory("widget", "app", Some(f))));

        let request = Request::get("widget://app/page").unwrap();
        match reg.lock().unwrap().route(&request) {
            Route::Factory { factory, builtin_fallback } => {
                assert!(!builtin_fallback);
                factory.create(None, None, request.scheme(), &request);
            }
            other => panic!("unexpected route {other:?}"),
        }
        assert_eq!(calls.lock().unwrap().as_slice(), &[("f", "widget".to_string())]);

        let other = Request::get("widget://other/page").unwrap();
        assert!(matches!(reg.lock().unwrap().route(&other), Route::Unhandled));
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn later_registration_overwrites() {
        let (io, reg) = registry(&[]);
        let calls = Calls::default();
        let (f1, f2) = (named("f1", &calls), named("f2", &calls));
        let before = reg.lock().unwrap().factory_count();
        assert!(with(&io, &reg, move |r| r.add_factory("x", "", Some(f1)) && r.add_factory("X", "", Some(f2))));

        assert_eq!(reg.lock().unwrap().factory_count(), before + 1);
        assert_eq!(who(&reg, &calls, "x:thing"), Some("f2"));
    }

    #[test]
    fn domain_ignored_for_non_standard_schemes() {
        let (io, reg) = registry(&[]);
        let calls = Calls::default();
        let f = named("f", &calls);
        assert!(with(&io, &reg, move |r| r.add_factory("app", "Some.Host", Some(f))));
        assert_eq!(who(&reg, &calls, "app://another.host/x"), Some("f"));
    }

    #[test]
    fn clear_restores_internal_handlers_only() {
        let (io, reg) = registry(&["widget"]);
        let calls = Calls::default();
        let f = named("f", &calls);
        assert!(with(&io, &reg, move |r| r.add_factory("widget", "", Some(f))));
        assert!(with(&io, &reg, |r| r.clear_factories()));

        let r = reg.lock().unwrap();
        assert!(r.resolve(&Url::parse("widget://app/page").unwrap()).is_none());
        assert!(r.resolve(&Url::parse("gosub://version").unwrap()).is_some());
        assert_eq!(r.factory_count(), 1);
        assert!(!r.has_hook("widget"));
    }

    #[test]
    fn hooks_follow_registrations_but_skip_protected_schemes() {
        let (io, reg) = registry(&[]);
        let calls = Calls::default();
        let (a, b) = (named("a", &calls), named("b", &calls));
        assert!(with(&io, &reg, move |r| r.add_factory("widget", "", Some(a)) && r.add_factory("data", "", Some(b))));
        {
            let r = reg.lock().unwrap();
            assert!(r.has_hook("widget"));
            assert!(!r.has_hook("data"));
            assert!(!r.has_hook("gosub"));
        }

        assert!(with(&io, &reg, |r| r.add_factory("widget", "", None)));
        assert!(!reg.lock().unwrap().has_hook("widget"));
    }

    #[test]
    fn builtin_schemes_fall_through() {
        let (_io, reg) = registry(&[]);
        let request = Request::get("https://example.com/").unwrap();
        assert!(matches!(reg.lock().unwrap().route(&request), Route::BuiltIn));
    }

    #[test]
    fn off_thread_mutations_are_rejected() {
        let (io, reg) = registry(&[]);
        let calls = Calls::default();
        let mut r = reg.lock().unwrap();
        assert!(!r.add_factory("widget", "", Some(named("f", &calls))));
        assert!(!r.clear_factories());
        assert!(!r.register_standard_scheme("widget"));
        assert_eq!(r.factory_count(), 1);
        drop(r);

        assert!(with(&io, &reg, |r| r.register_standard_scheme("Widget")));
        assert!(reg.lock().unwrap().is_standard_scheme("widget"));
    }
}
