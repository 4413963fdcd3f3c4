//! Preview server for the built site.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::services::{ServeDir, ServeFile};

/// Requests whose path starts with `source` are answered from `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRule {
    /// Path prefix, e.g. `/css/`
    pub source: String,

    /// Absolute URL or path the prefix is replaced with
    pub target: String,
}

/// Where a proxy rule sends its requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyTarget {
    /// A path on this server, served from the preview root
    Internal(String),

    /// Another origin, forwarded over HTTP
    Foreign(String),
}

/// Configuration for the preview server.
#[derive(Debug, Clone)]
pub struct PreviewConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Advertise `https` URLs; TLS itself is terminated elsewhere
    pub https: bool,

    /// Directory served at `/`
    pub root: PathBuf,

    /// Path appended to the origin to form the preview URL
    pub open: Option<String>,

    /// Document served for unmatched routes, relative to `root`
    pub fallback: Option<String>,

    /// Path rewrite rules, applied before static files
    pub proxies: Vec<ProxyRule>,

    /// Reload client script added to every HTML page served
    pub reload_script: Option<String>,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8000,
            https: false,
            root: PathBuf::from("."),
            open: Some("/docs/".to_string()),
            fallback: Some("docs/index.html".to_string()),
            proxies: Vec::new(),
            reload_script: None,
        }
    }
}

impl PreviewConfig {
    fn scheme(&self) -> &'static str {
        if self.https {
            "https"
        } else {
            "http"
        }
    }

    /// `scheme://host:port`
    pub fn origin(&self) -> String {
        format!("{}://{}:{}", self.scheme(), self.host, self.port)
    }

    /// The URL opened in the browser and sent with reload signals.
    pub fn url(&self) -> String {
        format!("{}{}", self.origin(), self.open.as_deref().unwrap_or("/"))
    }
}

/// Errors that can occur with the servers.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind to {0}: {1}")]
    BindError(String, String),

    #[error("Server is already running")]
    AlreadyRunning,

    #[error("Invalid proxy rule for '{prefix}': {message}")]
    InvalidProxy { prefix: String, message: String },
}

/// Preview server for a directory.
#[derive(Debug)]
pub struct PreviewServer {
    config: PreviewConfig,
    running: AtomicBool,
    addr: OnceLock<SocketAddr>,
}

impl PreviewServer {
    /// Create a preview server that is not yet listening.
    pub fn new(config: PreviewConfig) -> Self {
        Self {
            config,
            running: AtomicBool::new(false),
            addr: OnceLock::new(),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &PreviewConfig {
        &self.config
    }

    /// The preview URL.
    pub fn url(&self) -> String {
        self.config.url()
    }

    /// Address the server is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.addr.get().copied()
    }

    /// Bind and serve in the background.
    ///
    /// Fails with [`ServerError::AlreadyRunning`] when called twice.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }

        let app = router(&self.config)?;
        let endpoint = format!("{}:{}", self.config.host, self.config.port);

        let listener = tokio::net::TcpListener::bind((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|e| ServerError::BindError(endpoint.clone(), e.to_string()))?;
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(endpoint, e.to_string()))?;
        let _ = self.addr.set(addr);

        if self.config.https {
            tracing::warn!("Serving plain HTTP on {}; terminate TLS in front of it", addr);
        }

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Preview server stopped: {}", e);
            }
        });

        tracing::info!(
            "Serving {} at {}",
            self.config.root.display(),
            self.config.url()
        );

        Ok(addr)
    }
}

/// Build the preview router: proxy rules first, then static files with the
/// fallback document.
pub fn router(config: &PreviewConfig) -> Result<Router, ServerError> {
    let mut app = Router::new();
    let client = reqwest::Client::new();

    for rule in &config.proxies {
        let mount = mount_point(rule)?;

        app = match resolve_proxy(rule, config)? {
            ProxyTarget::Internal(path) => {
                let dir = config.root.join(path.trim_start_matches('/'));
                tracing::debug!("Proxy {} -> {}", rule.source, dir.display());
                app.nest_service(&mount, ServeDir::new(dir))
            }
            ProxyTarget::Foreign(base) => {
                tracing::debug!("Proxy {} -> {}", rule.source, base);
                let forward = Router::new()
                    .fallback(forward_handler)
                    .with_state(Arc::new(Forwarder {
                        client: client.clone(),
                        base,
                    }));
                app.nest_service(&mount, forward)
            }
        };
    }

    let root = ServeDir::new(&config.root);
    let app = match &config.fallback {
        Some(fallback) => {
            app.fallback_service(root.fallback(ServeFile::new(config.root.join(fallback))))
        }
        None => app.fallback_service(root),
    };

    let app = match &config.reload_script {
        Some(src) => app.layer(middleware::map_response_with_state(
            Arc::<str>::from(src.as_str()),
            inject_reload,
        )),
        None => app,
    };

    Ok(app)
}

async fn inject_reload(State(src): State<Arc<str>>, response: Response) -> Response {
    let is_html = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/html"));
    if response.status() != StatusCode::OK || !is_html {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("Failed to read page body: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let html = inject_script(&String::from_utf8_lossy(&bytes), &src);
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(html))
}

/// Insert a `<script src>` tag before the closing `</body>`, or append it.
pub fn inject_script(html: &str, src: &str) -> String {
    let tag = format!("<script src=\"{src}\"></script>");
    match html.to_ascii_lowercase().rfind("</body>") {
        Some(at) => format!("{}{}{}", &html[..at], tag, &html[at..]),
        None => format!("{html}{tag}"),
    }
}

/// Decide whether a rule stays on this server or leaves it.
pub fn resolve_proxy(rule: &ProxyRule, config: &PreviewConfig) -> Result<ProxyTarget, ServerError> {
    let invalid = |message: String| ServerError::InvalidProxy {
        prefix: rule.source.clone(),
        message,
    };

    let uri: Uri = rule
        .target
        .parse()
        .map_err(|e: axum::http::uri::InvalidUri| invalid(e.to_string()))?;

    let Some(scheme) = uri.scheme_str() else {
        if !rule.target.starts_with('/') {
            return Err(invalid("relative targets must start with '/'".to_string()));
        }
        return Ok(ProxyTarget::Internal(uri.path().to_string()));
    };

    let port = uri
        .port_u16()
        .unwrap_or(if scheme == "https" { 443 } else { 80 });
    let same_origin = scheme == config.scheme()
        && port == config.port
        && uri.host().is_some_and(|host| same_host(host, &config.host));

    if same_origin {
        Ok(ProxyTarget::Internal(uri.path().to_string()))
    } else {
        Ok(ProxyTarget::Foreign(rule.target.clone()))
    }
}

fn mount_point(rule: &ProxyRule) -> Result<String, ServerError> {
    let mount = rule.source.trim_end_matches('/');
    let invalid = |message: &str| ServerError::InvalidProxy {
        prefix: rule.source.clone(),
        message: message.to_string(),
    };

    if !mount.starts_with('/') {
        return Err(invalid("source must start with '/' and not be the root"));
    }
    if mount.contains(['{', '}', '*']) {
        return Err(invalid("source must be a literal path"));
    }

    Ok(mount.to_string())
}

fn same_host(a: &str, b: &str) -> bool {
    const LOOPBACK: [&str; 3] = ["localhost", "127.0.0.1", "[::1]"];

    a.eq_ignore_ascii_case(b)
        || (LOOPBACK.iter().any(|l| a.eq_ignore_ascii_case(l))
            && LOOPBACK.iter().any(|l| b.eq_ignore_ascii_case(l)))
}

/// Forwards requests to a foreign origin.
struct Forwarder {
    client: reqwest::Client,
    base: String,
}

impl Forwarder {
    async fn forward(&self, req: Request) -> Result<Response, String> {
        let (parts, body) = req.into_parts();

        let mut url = format!("{}{}", self.base.trim_end_matches('/'), parts.uri.path());
        if let Some(query) = parts.uri.query() {
            url.push('?');
            url.push_str(query);
        }

        let body = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(|e| e.to_string())?;

        let mut headers = parts.headers;
        headers.remove(header::HOST);

        tracing::debug!("{} {}", parts.method, url);

        let upstream = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        headers.remove(header::TRANSFER_ENCODING);
        headers.remove(header::CONNECTION);
        let bytes = upstream.bytes().await.map_err(|e| e.to_string())?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

async fn forward_handler(State(forwarder): State<Arc<Forwarder>>, req: Request) -> Response {
    match forwarder.forward(req).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("Proxy to {} failed: {}", forwarder.base, e);
            (StatusCode::BAD_GATEWAY, e).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn rule(source: &str, target: &str) -> ProxyRule {
        ProxyRule {
            source: source.to_string(),
            target: target.to_string(),
        }
    }

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn get(url: String) -> (StatusCode, String) {
        let response = reqwest::get(url).await.unwrap();
        let status = response.status();
        (status, response.text().await.unwrap())
    }

    fn site() -> (TempDir, PreviewConfig) {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("docs/css")).unwrap();
        fs::write(temp.path().join("docs/index.html"), "home").unwrap();
        fs::write(temp.path().join("docs/css/docs.css"), "a{}").unwrap();

        let config = PreviewConfig {
            root: temp.path().to_path_buf(),
            proxies: vec![rule("/css/", "http://localhost:8000/docs/css/")],
            ..PreviewConfig::default()
        };
        (temp, config)
    }

    #[test]
    fn builds_preview_url() {
        assert_eq!(PreviewConfig::default().url(), "http://localhost:8000/docs/");

        let config = PreviewConfig {
            https: true,
            open: None,
            ..PreviewConfig::default()
        };
        assert_eq!(config.url(), "https://localhost:8000/");
    }

    #[test]
    fn resolves_proxy_targets() {
        let config = PreviewConfig::default();

        assert_eq!(
            resolve_proxy(&rule("/css/", "http://localhost:8000/docs/css/"), &config).unwrap(),
            ProxyTarget::Internal("/docs/css/".to_string())
        );
        assert_eq!(
            resolve_proxy(&rule("/css/", "http://127.0.0.1:8000/docs/css/"), &config).unwrap(),
            ProxyTarget::Internal("/docs/css/".to_string())
        );
        assert_eq!(
            resolve_proxy(&rule("/vendor/", "/docs/vendor/"), &config).unwrap(),
            ProxyTarget::Internal("/docs/vendor/".to_string())
        );
        assert_eq!(
            resolve_proxy(&rule("/api/", "http://localhost:9000/api/"), &config).unwrap(),
            ProxyTarget::Foreign("http://localhost:9000/api/".to_string())
        );
    }

    #[test]
    fn rejects_root_and_pattern_sources() {
        let mut config = PreviewConfig::default();
        config.proxies = vec![rule("/", "/docs/")];
        assert!(matches!(
            router(&config),
            Err(ServerError::InvalidProxy { .. })
        ));

        config.proxies = vec![rule("/{id}/", "/docs/")];
        assert!(matches!(
            router(&config),
            Err(ServerError::InvalidProxy { .. })
        ));
    }

    #[tokio::test]
    async fn serves_files_proxies_and_fallback() {
        let (_temp, config) = site();
        let addr = serve(router(&config).unwrap()).await;

        assert_eq!(
            get(format!("http://{addr}/css/docs.css")).await,
            (StatusCode::OK, "a{}".to_string())
        );
        assert_eq!(
            get(format!("http://{addr}/docs/")).await,
            (StatusCode::OK, "home".to_string())
        );
        assert_eq!(
            get(format!("http://{addr}/docs/guide/deep/link")).await,
            (StatusCode::OK, "home".to_string())
        );
    }

    #[test]
    fn script_goes_before_body_end() {
        assert_eq!(
            inject_script("<html><body><p>x</p></BODY></html>", "/r.js"),
            "<html><body><p>x</p><script src=\"/r.js\"></script></BODY></html>"
        );
        assert_eq!(
            inject_script("<p>x</p>", "/r.js"),
            "<p>x</p><script src=\"/r.js\"></script>"
        );
    }

    #[tokio::test]
    async fn served_pages_load_reload_client() {
        let (temp, mut config) = site();
        fs::write(
            temp.path().join("docs/page.html"),
            "<html><body>page</body></html>",
        )
        .unwrap();
        config.reload_script = Some("http://localhost:35729/livereload.js".to_string());
        let addr = serve(router(&config).unwrap()).await;

        let (status, page) = get(format!("http://{addr}/docs/page.html")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            page,
            "<html><body>page<script src=\"http://localhost:35729/livereload.js\"></script></body></html>"
        );

        let (_, fallback) = get(format!("http://{addr}/docs/deep/link")).await;
        assert!(fallback.contains("livereload.js"));

        let (_, css) = get(format!("http://{addr}/css/docs.css")).await;
        assert_eq!(css, "a{}");
    }

    #[tokio::test]
    async fn missing_files_are_404_without_fallback() {
        let (_temp, mut config) = site();
        config.fallback = None;
        let addr = serve(router(&config).unwrap()).await;

        let (status, _) = get(format!("http://{addr}/docs/missing.html")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn forwards_foreign_proxies() {
        let upstream = serve(Router::new().fallback(|uri: Uri| async move { uri.to_string() })).await;

        let (_temp, mut config) = site();
        config.proxies = vec![rule("/api/", &format!("http://{upstream}/v1/"))];
        let addr = serve(router(&config).unwrap()).await;

        assert_eq!(
            get(format!("http://{addr}/api/items?page=2")).await,
            (StatusCode::OK, "/v1/items?page=2".to_string())
        );
    }

    #[tokio::test]
    async fn start_twice_fails() {
        let (_temp, mut config) = site();
        config.host = "127.0.0.1".to_string();
        config.port = 0;
        let server = PreviewServer::new(config);

        let addr = server.start().await.unwrap();
        assert_eq!(server.local_addr(), Some(addr));

        assert!(matches!(
            server.start().await,
            Err(ServerError::AlreadyRunning)
        ));
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (_temp, mut config) = site();
        config.host = "127.0.0.1".to_string();
        config.port = taken.local_addr().unwrap().port();

        let err = PreviewServer::new(config).start().await.unwrap_err();

        assert!(matches!(err, ServerError::BindError(_, _)));
    }
}
