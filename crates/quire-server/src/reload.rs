//! WebSocket live reload channel.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::browser::open_browser;
use crate::server::ServerError;

/// Messages sent to reload clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReloadMessage {
    /// Reload the page showing `path`
    Reload { path: String },

    /// Connection established
    Connected,
}

/// Hub for broadcasting reload messages to all connected clients.
#[derive(Debug, Clone)]
pub struct ReloadHub {
    sender: broadcast::Sender<ReloadMessage>,
}

impl ReloadHub {
    /// Create a new reload hub.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }

    /// Send a message to all connected clients.
    pub fn send(&self, msg: ReloadMessage) {
        // Ignore send errors (no receivers)
        let _ = self.sender.send(msg);
    }

    /// Subscribe to reload messages.
    pub fn subscribe(&self) -> broadcast::Receiver<ReloadMessage> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ReloadHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the reload server.
#[derive(Debug, Clone)]
pub struct ReloadConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// URL opened in the browser on first start; `None` opens nothing
    pub open_url: Option<String>,

    /// Browser application; `None` uses the system default
    pub browser: Option<String>,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 35729,
            open_url: None,
            browser: None,
        }
    }
}

impl ReloadConfig {
    /// URL of the client script pages load to receive reloads.
    pub fn script_url(&self) -> String {
        format!("http://{}:{}/livereload.js", self.host, self.port)
    }
}

struct ReloadState {
    hub: ReloadHub,
    ws_url: String,
}

/// The live reload server.
///
/// Shared by `Arc` between the tasks that start it and the watch bindings
/// that signal it. It is started at most once.
#[derive(Debug)]
pub struct LiveReload {
    config: ReloadConfig,
    hub: ReloadHub,
    started: AtomicBool,
    addr: OnceLock<SocketAddr>,
}

impl LiveReload {
    /// Create a reload server that is not yet listening.
    pub fn new(config: ReloadConfig) -> Self {
        Self {
            config,
            hub: ReloadHub::new(),
            started: AtomicBool::new(false),
            addr: OnceLock::new(),
        }
    }

    /// Start listening and open the browser.
    ///
    /// Returns `Ok(true)` for the call that started the server and
    /// `Ok(false)` for every later call.
    pub async fn start(&self) -> Result<bool, ServerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::debug!("Live reload already running");
            return Ok(false);
        }

        let listener = tokio::net::TcpListener::bind((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|e| ServerError::BindError(self.endpoint(), e.to_string()))?;
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(self.endpoint(), e.to_string()))?;
        let _ = self.addr.set(addr);

        let state = Arc::new(ReloadState {
            hub: self.hub.clone(),
            ws_url: format!("ws://{}:{}/livereload", self.config.host, addr.port()),
        });

        let app = Router::new()
            .route("/livereload", get(ws_handler))
            .route("/livereload.js", get(script_handler))
            .with_state(state);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Live reload server stopped: {}", e);
            }
        });

        tracing::info!("Live reload listening on {}", addr);

        if let Some(url) = &self.config.open_url {
            open_browser(url, self.config.browser.as_deref());
        }

        Ok(true)
    }

    /// Whether `start` has been called.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Address the server is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.addr.get().copied()
    }

    /// Tell every connected client to reload `path`.
    pub fn refresh(&self, path: &str) {
        tracing::info!("Reloading {}", path);
        self.hub.send(ReloadMessage::Reload {
            path: path.to_string(),
        });
    }

    /// Subscribe to the messages sent to clients.
    pub fn subscribe(&self) -> broadcast::Receiver<ReloadMessage> {
        self.hub.subscribe()
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }
}

/// Handler for the reload WebSocket endpoint.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ReloadState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Forward hub messages to one client until either side goes away.
async fn handle_ws(mut socket: WebSocket, state: Arc<ReloadState>) {
    let mut rx = state.hub.subscribe();

    if send_json(&mut socket, &ReloadMessage::Connected).await.is_err() {
        return;
    }

    loop {
        match rx.recv().await {
            Ok(msg) => {
                if send_json(&mut socket, &msg).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!("Reload client lagged by {} messages", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn send_json(socket: &mut WebSocket, msg: &ReloadMessage) -> Result<(), axum::Error> {
    let json = serde_json::to_string(msg).map_err(axum::Error::new)?;
    socket.send(Message::Text(json.into())).await
}

/// Handler for the reload client script.
async fn script_handler(State(state): State<Arc<ReloadState>>) -> impl IntoResponse {
    (
        [("content-type", "application/javascript")],
        client_script(&state.ws_url),
    )
}

/// Generate the client-side reload script.
pub fn client_script(ws_url: &str) -> String {
    format!(
        r#"
(function() {{
  'use strict';

  let attempts = 0;
  const maxAttempts = 10;

  function connect() {{
    const ws = new WebSocket('{}');

    ws.onopen = function() {{
      console.log('[livereload] Connected');
      attempts = 0;
    }};

    ws.onmessage = function(event) {{
      const msg = JSON.parse(event.data);
      if (msg.type === 'reload') {{
        location.reload();
      }}
    }};

    ws.onclose = function() {{
      if (attempts < maxAttempts) {{
        attempts++;
        setTimeout(connect, 1000 * attempts);
      }}
    }};
  }}

  connect();
}})();
"#,
        ws_url
    )
}
