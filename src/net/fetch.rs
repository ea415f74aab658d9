//! The built-in engine job for `http` and `https`.
//!
//! When no scheme handler factory claims an `http(s)` request, it is served by an
//! [`HttpResourceHandler`]: the transfer runs with `reqwest` on the I/O thread's
//! runtime, the response is buffered, and the job pipeline serves it like any other
//! handler's response.

use crate::engine::io_thread::IoThread;
use crate::engine::resource::{RequestJobCallback, ResourceHandler};
use crate::net::status::NetError;
use crate::net::{Request, ResourceResponse, Response};
use http::header::CONTENT_TYPE;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::AbortHandle;
use url::Url;

/// Loads a request and returns the buffered response.
///
/// The client decides whether redirects are followed; the network service builds one
/// that does not.
pub async fn fetch(client: &reqwest::Client, request: &Request) -> Result<Response, reqwest::Error> {
    let mut builder = client
        .request(request.method().clone(), request.url().clone())
        .headers(request.headers().clone());
    if let Some(body) = request.body() {
        builder = builder.body(body.to_vec());
    }
    let res = builder.send().await?;

    // Fetch results
    let final_url = res.url().clone();
    let status = res.status().as_u16();
    let status_text = res.status().canonical_reason().unwrap_or("Unknown").to_string();
    let headers = res.headers().clone();
    let mime_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty());

    // Fetch body. We don't do streaming yet
    let body = res.bytes().await?.to_vec();
    let content_length = Some(body.len() as u64);

    Ok(Response {
        url: final_url,
        status,
        status_text,
        mime_type,
        headers,
        redirect: None,
        body,
        content_length,
    })
}

#[derive(Default)]
struct HttpState {
    result: Option<Result<Response, NetError>>,
    offset: usize,
    task: Option<AbortHandle>,
}

pub struct HttpResourceHandler {
    io: Arc<IoThread>,
    client: reqwest::Client,
    state: Arc<Mutex<HttpState>>,
}

impl HttpResourceHandler {
    pub fn new(io: Arc<IoThread>, client: reqwest::Client) -> Self {
        Self {
            io,
            client,
            state: Arc::new(Mutex::new(HttpState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HttpState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ResourceHandler for HttpResourceHandler {
    fn process_request(&self, request: &Request, callback: &RequestJobCallback) -> bool {
        let client = self.client.clone();
        let request = request.clone();
        let state = self.state.clone();
        let callback = callback.clone();

        let task = self.io.spawn_future(async move {
            let result = fetch(&client, &request).await.map_err(|e| {
                log::debug!("fetching {} failed: {}", request.url(), e);
                NetError::ConnectionFailed
            });
            state.lock().unwrap_or_else(PoisonError::into_inner).result = Some(result);
            callback.resume();
        });
        self.lock().task = Some(task);
        true
    }

    fn get_response_headers(&self, response: &mut ResourceResponse, remaining_length: &mut i64, _redirect_url: &mut Option<Url>) {
        let st = self.lock();
        match &st.result {
            Some(Ok(resp)) => {
                response.set_status(resp.status);
                response.set_status_text(resp.status_text.clone());
                response.set_headers(resp.headers.clone());
                if let Some(mime) = &resp.mime_type {
                    response.set_mime_type(mime.clone());
                }
                *remaining_length = resp.body.len() as i64;
            }
            Some(Err(e)) => response.set_error(*e),
            None => response.set_error(NetError::Failed),
        }
    }

    fn read_response(&self, buf: &mut [u8], bytes_read: &mut usize, _callback: &RequestJobCallback) -> bool {
        let mut st = self.lock();
        let offset = st.offset;
        let Some(Ok(resp)) = &st.result else {
            return false;
        };
        let n = buf.len().min(resp.body.len().saturating_sub(offset));
        if n == 0 {
            return false;
        }
        buf[..n].copy_from_slice(&resp.body[offset..offset + n]);
        st.offset += n;
        *bytes_read = n;
        true
    }

    fn cancel(&self) {
        if let Some(task) = self.lock().task.take() {
            task.abort();
        }
    }
}
