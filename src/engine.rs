//! The network engine: the designated I/O thread, scheme dispatch, resource jobs,
//! request contexts and cookies.

pub mod config;
pub mod context;
pub mod cookies;
pub mod errors;
pub mod ids;
pub mod io_thread;
pub mod resource;
pub mod scheme;
mod service;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{NetConfig, NetConfigBuilder, NetConfigError, RequestDefaults};
pub use context::{RequestContext, RequestContextHandler, RequestContextProxy};
pub use errors::EngineError;
pub use ids::{FrameId, ProxyId, RequestId, TabId, ZoneId};
pub use io_thread::IoThread;
pub use service::NetworkService;
