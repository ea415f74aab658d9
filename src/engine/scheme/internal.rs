//! The built-in `gosub://` pages.

use crate::engine::ids::{FrameId, TabId};
use crate::engine::resource::{ResourceHandler, StreamResourceHandler};
use crate::engine::scheme::SchemeHandlerFactory;
use crate::net::Request;
use std::sync::Arc;

const LICENSE_NOTICE: &str = concat!(
    env!("CARGO_PKG_NAME"),
    " ",
    env!("CARGO_PKG_VERSION"),
    "\n\nThis build of the Gosub network layer is distributed under the terms of the\n",
    "license that accompanies the Gosub project.\n",
);

/// Serves `gosub://version`, `gosub://license` and a not-found page for anything else.
pub struct InternalSchemeFactory {
    user_agent: String,
}

impl InternalSchemeFactory {
    pub fn new(user_agent: &str) -> Self {
        Self {
            user_agent: user_agent.to_string(),
        }
    }

    fn version_page(&self) -> String {
        format!(
            "<!DOCTYPE html>\n<html><head><title>Version</title></head><body>\n\
             <h1>{} {}</h1>\n<p>User agent: <code>{}</code></p>\n</body></html>\n",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            escape_html(&self.user_agent),
        )
    }
}

fn not_found_page(path: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html><head><title>Not found</title></head><body>\n\
         <h1>Not found</h1>\n<p>There is no internal page at <code>{}</code>.</p>\n</body></html>\n",
        escape_html(path)
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

impl SchemeHandlerFactory for InternalSchemeFactory {
    fn create(&self, _tab_id: Option<TabId>, _frame_id: Option<FrameId>, _scheme: &str, request: &Request) -> Option<Arc<dyn ResourceHandler>> {
        let url = request.url();
        let handler = match url.host_str().unwrap_or_default() {
            "version" => StreamResourceHandler::new("text/html", self.version_page()),
            "license" => StreamResourceHandler::new("text/plain", LICENSE_NOTICE),
            _ => StreamResourceHandler::new("text/html", not_found_page(url.as_str())).with_status(404, "Not Found"),
        };
        Some(Arc::new(handler))
    }
}
