use crate::engine::ids::{FrameId, TabId};
use crate::engine::resource::ResourceHandler;
use crate::net::Request;
use std::sync::Arc;

/// Creates the handler for a request that matched a registration.
///
/// Returning `None` passes on the request. For `http` and `https` the engine's built-in
/// job takes over; any other scheme fails with an unknown-scheme error.
pub trait SchemeHandlerFactory: Send + Sync {
    fn create(
        &self,
        tab_id: Option<TabId>,
        frame_id: Option<FrameId>,
        scheme: &str,
        request: &Request,
    ) -> Option<Arc<dyn ResourceHandler>>;
}

impl<F> SchemeHandlerFactory for F
where
    F: Fn(Option<TabId>, Option<FrameId>, &str, &Request) -> Option<Arc<dyn ResourceHandler>> + Send + Sync,
{
    fn create(
        &self,
        tab_id: Option<TabId>,
        frame_id: Option<FrameId>,
        scheme: &str,
        request: &Request,
    ) -> Option<Arc<dyn ResourceHandler>> {
        self(tab_id, frame_id, scheme, request)
    }
}
