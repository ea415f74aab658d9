//! Resource jobs: the per-request state machine that drives an external
//! [`ResourceHandler`] and the continuation object handed to it.
//!
//! A request that matched a scheme handler factory is wrapped in a
//! [`ResourceRequestJob`]. The job loads cookies, lets the handler process the request,
//! waits for headers, saves response cookies and then serves the body as the request
//! layer pulls it. A handler that cannot answer synchronously keeps the
//! [`RequestJobCallback`] it was given and resumes the job later from any thread.

mod callback;
mod handler;
mod job;
mod mime;
mod stream;

pub use callback::{CallbackKind, RequestJobCallback};
pub use handler::ResourceHandler;
pub use job::{JobPhase, ReadResult, ResourceRequestJob};
pub use mime::mime_type_from_url;
pub use stream::StreamResourceHandler;

pub(crate) use callback::WeakCallback;
