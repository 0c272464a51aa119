//! Diagnostic HTTP surface: an ephemeral-port server exposing `/debug` with
//! one HTML fragment per registered component.

use std::sync::{Arc, Mutex};

use tracing::info;

use crate::foundation::error::{RayfleetError, RayfleetResult};

/// A component that can render a diagnostic HTML fragment.
///
/// Fragments must never contain credentials or other secrets.
pub trait DebugPanel: Send + Sync {
    /// Panel heading.
    fn title(&self) -> String;
    /// Append the panel body to `out`.
    fn render_html(&self, out: &mut String);
}

/// Static text panel, mostly for tests and simple status lines.
pub struct TextPanel {
    pub title: String,
    pub body: String,
}

impl DebugPanel for TextPanel {
    fn title(&self) -> String {
        self.title.clone()
    }

    fn render_html(&self, out: &mut String) {
        out.push_str("<p>");
        out.push_str(&self.body);
        out.push_str("</p>");
    }
}

/// Debug HTTP server bound to an ephemeral localhost port.
pub struct DebugFrontend {
    port: u16,
    panels: Arc<Mutex<Vec<Arc<dyn DebugPanel>>>>,
}

impl DebugFrontend {
    /// Bind an ephemeral port and start serving `/debug`.
    pub fn spawn() -> RayfleetResult<Self> {
        let server = tiny_http::Server::http("127.0.0.1:0")
            .map_err(|e| RayfleetError::validation(format!("bind debug server: {e}")))?;
        let port = server
            .server_addr()
            .to_ip()
            .map(|addr| addr.port())
            .ok_or_else(|| RayfleetError::validation("debug server has no TCP address"))?;

        let panels: Arc<Mutex<Vec<Arc<dyn DebugPanel>>>> = Arc::new(Mutex::new(Vec::new()));
        let serving = panels.clone();
        std::thread::spawn(move || {
            for request in server.incoming_requests() {
                let response = if request.url() == "/debug" {
                    let mut response =
                        tiny_http::Response::from_string(render_page(&serving));
                    if let Ok(header) = tiny_http::Header::from_bytes(
                        &b"Content-Type"[..],
                        &b"text/html; charset=utf-8"[..],
                    ) {
                        response = response.with_header(header);
                    }
                    response
                } else {
                    tiny_http::Response::from_string("not found").with_status_code(404)
                };
                let _ = request.respond(response);
            }
        });

        info!(port, "debug frontend listening");
        Ok(Self { port, panels })
    }

    /// Port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Add a panel to the `/debug` page.
    pub fn register(&self, panel: Arc<dyn DebugPanel>) {
        self.panels
            .lock()
            .expect("debug panel lock poisoned")
            .push(panel);
    }
}

fn render_page(panels: &Mutex<Vec<Arc<dyn DebugPanel>>>) -> String {
    let panels = panels.lock().expect("debug panel lock poisoned");
    let mut page = String::from("<!DOCTYPE html>");
    page.push_str(&format!("#Debug panels: {}", panels.len()));
    for panel in panels.iter() {
        page.push_str("<hr/>");
        page.push_str(&format!("<h2>{}</h2>", panel.title()));
        panel.render_html(&mut page);
    }
    page
}
