//! Custom URL scheme dispatch.
//!
//! The [`HandlerRegistry`] maps `(scheme, domain)` pairs onto
//! [`SchemeHandlerFactory`]s and decides who services a request: a registered factory,
//! the built-in engine job (for `http` and `https`), or nobody. Embedders register
//! factories through a [`SchemeRegistrar`], which may be used from any thread.

mod factory;
mod internal;
mod registrar;
mod registry;

pub use factory::SchemeHandlerFactory;
pub use internal::InternalSchemeFactory;
pub use registrar::SchemeRegistrar;
pub use registry::{HandlerRegistry, Route};

/// Schemes whose low-level protocol hook is owned by the engine and never replaced.
pub const INTERNAL_PROTECTED_SCHEMES: [&str; 5] = ["blob", "data", "file", "filesystem", "gosub"];

/// Schemes the engine can load by itself when no factory services them.
pub const BUILTIN_SCHEMES: [&str; 2] = ["http", "https"];

/// Schemes that use authority syntax out of the box.
pub const DEFAULT_STANDARD_SCHEMES: [&str; 7] = ["http", "https", "ws", "wss", "ftp", "file", "gosub"];

/// Scheme served by the built-in internal handlers.
pub const INTERNAL_SCHEME: &str = "gosub";
