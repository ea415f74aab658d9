//! Request and response values, and the request layer that drives resource jobs.

pub mod fetch;
pub mod request;
pub mod response;
pub mod status;
pub mod url_request;

pub use fetch::{fetch, HttpResourceHandler};
pub use request::{LoadFlags, Request};
pub use response::{ResourceResponse, Response};
pub use status::{NetError, RequestStatus};
pub use url_request::{LoadError, RequestHandle, RequestJobDelegate, UrlRequest};
