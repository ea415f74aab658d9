use gosub_net::engine::resource::{RequestJobCallback, ResourceHandler, StreamResourceHandler};
use gosub_net::engine::scheme::SchemeHandlerFactory;
use gosub_net::engine::{FrameId, NetConfig, NetworkService, TabId, ZoneId};
use gosub_net::net::{Request, ResourceResponse};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

/// Serves `notes://<name>` from a fixed set of notes. Headers are reported from a
/// worker thread to show that a handler may resume its job from anywhere.
struct NoteHandler {
    text: Option<String>,
    offset: Mutex<usize>,
}

impl ResourceHandler for NoteHandler {
    fn process_request(&self, _request: &Request, callback: &RequestJobCallback) -> bool {
        let callback = callback.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            callback.resume();
        });
        true
    }

    fn get_response_headers(&self, response: &mut ResourceResponse, remaining_length: &mut i64, _redirect_url: &mut Option<Url>) {
        match &self.text {
            Some(text) => {
                response.set_mime_type("text/plain");
                *remaining_length = text.len() as i64;
            }
            None => {
                response.set_status(404);
                response.set_status_text("Not Found");
                *remaining_length = 0;
            }
        }
    }

    fn read_response(&self, buf: &mut [u8], bytes_read: &mut usize, _callback: &RequestJobCallback) -> bool {
        let Some(text) = &self.text else {
            return false;
        };
        let mut offset = self.offset.lock().unwrap();
        let n = buf.len().min(text.len() - *offset);
        if n == 0 {
            return false;
        }
        buf[..n].copy_from_slice(&text.as_bytes()[*offset..*offset + n]);
        *offset += n;
        *bytes_read = n;
        true
    }

    fn cancel(&self) {
        log::info!("note request canceled");
    }
}

struct NoteFactory {
    notes: HashMap<String, String>,
}

impl SchemeHandlerFactory for NoteFactory {
    fn create(&self, _tab_id: Option<TabId>, _frame_id: Option<FrameId>, _scheme: &str, request: &Request) -> Option<Arc<dyn ResourceHandler>> {
        let name = request.url().host_str().unwrap_or_default();
        Some(Arc::new(NoteHandler {
            text: self.notes.get(name).cloned(),
            offset: Mutex::new(0),
        }))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    // Configure the network service. `notes` uses authority syntax, so factories can be
    // registered per note as well as for the scheme as a whole.
    let config = NetConfig::builder()
        .user_agent("GosubDemo/0.1")
        .accept_languages("en-US,en;q=0.9")
        .standard_scheme("notes")
        .build()?;
    let service = NetworkService::new(Some(config))?;

    let notes = HashMap::from([
        ("hello".to_string(), "Hello from a custom scheme!".to_string()),
        ("todo".to_string(), "- write more notes".to_string()),
    ]);
    let registrar = service.registrar();
    registrar.register_scheme_handler_factory("notes", "", Some(Arc::new(NoteFactory { notes })));

    // A domain-specific registration wins over the scheme-wide one
    registrar.register_scheme_handler_factory(
        "notes",
        "motd",
        Some(Arc::new(
            |_: Option<TabId>, _: Option<FrameId>, _: &str, _: &Request| -> Option<Arc<dyn ResourceHandler>> {
                Some(Arc::new(StreamResourceHandler::new("text/plain", "Message of the day: ship it")))
            },
        )),
    );

    let context = service.create_context(ZoneId::new(), None)?;
    for url in ["notes://hello", "notes://motd", "notes://missing", "gosub://version"] {
        match context.fetch(Request::get(url)?).await {
            Ok(resp) => {
                println!("{url} -> {} {} ({})", resp.status, resp.status_text, resp.mime_type.as_deref().unwrap_or("?"));
                println!("{}\n", resp.text());
            }
            Err(e) => println!("{url} -> error: {e}\n"),
        }
    }

    match context.fetch(Request::get("unknown:thing")?).await {
        Ok(_) => println!("unknown:thing unexpectedly loaded"),
        Err(e) => println!("unknown:thing -> error: {e}"),
    }

    service.shutdown();
    Ok(())
}
