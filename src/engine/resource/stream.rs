use crate::engine::resource::{RequestJobCallback, ResourceHandler};
use crate::net::{Request, ResourceResponse};
use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use std::sync::{Mutex, PoisonError};
use url::Url;

/// Serves an in-memory body.
///
/// Headers are reported through the callback (never synchronously) and the body is
/// handed out in buffer-sized chunks.
#[derive(Debug)]
pub struct StreamResourceHandler {
    status: u16,
    status_text: String,
    mime_type: String,
    headers: HeaderMap,
    body: Vec<u8>,
    offset: Mutex<usize>,
}

impl StreamResourceHandler {
    pub fn new<M: Into<String>, B: Into<Vec<u8>>>(mime_type: M, body: B) -> Self {
        Self {
            status: 200,
            status_text: "OK".to_string(),
            mime_type: mime_type.into(),
            headers: HeaderMap::new(),
            body: body.into(),
            offset: Mutex::new(0),
        }
    }

    pub fn with_status<S: Into<String>>(mut self, status: u16, status_text: S) -> Self {
        self.status = status;
        self.status_text = status_text.into();
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }
}

impl ResourceHandler for StreamResourceHandler {
    fn process_request(&self, _request: &Request, callback: &RequestJobCallback) -> bool {
        callback.resume();
        true
    }

    fn get_response_headers(&self, response: &mut ResourceResponse, remaining_length: &mut i64, _redirect_url: &mut Option<Url>) {
        response.set_status(self.status);
        response.set_status_text(self.status_text.clone());
        response.set_mime_type(self.mime_type.clone());
        response.set_headers(self.headers.clone());
        *remaining_length = self.body.len() as i64;
    }

    fn read_response(&self, buf: &mut [u8], bytes_read: &mut usize, _callback: &RequestJobCallback) -> bool {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        let n = buf.len().min(self.body.len() - *offset);
        if n == 0 {
            return false;
        }
        buf[..n].copy_from_slice(&self.body[*offset..*offset + n]);
        *offset += n;
        *bytes_read = n;
        true
    }

    fn cancel(&self) {
        log::trace!("stream handler canceled at offset {}", self.offset.lock().unwrap_or_else(PoisonError::into_inner));
    }
}
