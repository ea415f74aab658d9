use crate::engine::cookies::Cookie;
use crate::engine::resource::RequestJobCallback;
use crate::net::{Request, ResourceResponse};
use url::Url;

/// Produces the response for one matched request.
///
/// All methods are called on the I/O thread. A method that cannot answer right away
/// keeps a clone of the callback and calls [`RequestJobCallback::resume`] later, from
/// any thread. Dropping every clone of an armed callback without resuming it cancels
/// the request.
pub trait ResourceHandler: Send + Sync {
    /// Starts processing `request`. Return `true` and resume `callback` once the response
    /// headers are available (possibly before returning). Returning `false` cancels the
    /// request.
    fn process_request(&self, request: &Request, callback: &RequestJobCallback) -> bool;

    /// Fills in the response head. `remaining_length` is the body size, `-1` when unknown
    /// (the body then ends when [`ResourceHandler::read_response`] returns `false`). Set
    /// `redirect_url` to redirect the request.
    fn get_response_headers(&self, response: &mut ResourceResponse, remaining_length: &mut i64, redirect_url: &mut Option<Url>);

    /// Copies body bytes into `buf` and stores the count in `bytes_read`.
    ///
    /// - `true` with `bytes_read > 0`: data is available.
    /// - `true` with `bytes_read == 0`: no data yet; resume `callback` when there is.
    /// - `false`: the body is complete.
    fn read_response(&self, buf: &mut [u8], bytes_read: &mut usize, callback: &RequestJobCallback) -> bool;

    /// The request was canceled. Called at most once.
    fn cancel(&self);

    /// Whether `cookie` may be sent with the request.
    fn can_get_cookie(&self, _cookie: &Cookie) -> bool {
        true
    }

    /// Whether `cookie`, received with the response, may be stored.
    fn can_set_cookie(&self, _cookie: &Cookie) -> bool {
        true
    }
}
