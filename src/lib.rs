//! Custom URL scheme dispatch and the resource job pipeline of the Gosub engine.
//!
//! Embedders register [`SchemeHandlerFactory`](engine::scheme::SchemeHandlerFactory)s
//! for their own schemes. Every matching request is wrapped in a
//! [`ResourceRequestJob`](engine::resource::ResourceRequestJob) that loads and stores
//! cookies, drives the [`ResourceHandler`](engine::resource::ResourceHandler) and
//! streams the body back to whoever started the request.

pub mod engine;
pub mod net;

pub use engine::{EngineError, NetConfig, NetworkService};
pub use net::{LoadError, Request, Response};
