//! App server: routing, the default server build loader and the listener.

use crate::config::DevConfig;
use crate::dev::{AppLoader, BuildSlot, ReadyInfo};
use crate::error::DevError;
use axum::{
    body::Bytes,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

/// Path the reload client is served from.
pub const RELOAD_SCRIPT_PATH: &str = "/__kiln/reload.js";

const RELOAD_SCRIPT: &str = include_str!("../../assets/dev/reload-client.js");
const RELOAD_PORT_PLACEHOLDER: &str = "__KILN_RELOAD_PORT__";

static BUILD_GENERATION_HEADER: HeaderName = HeaderName::from_static("x-kiln-build-generation");

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct AppState {
    slot: Arc<BuildSlot>,
    reload_script: Arc<str>,
}

/// Build the app server router.
///
/// - `/__kiln/reload.js` serves the live reload client for `reload_port`
/// - the public path serves the assets build directory from disk
/// - everything else goes to the current server build
pub fn app_router(config: &DevConfig, slot: Arc<BuildSlot>, reload_port: u16) -> Router {
    let state = AppState {
        slot,
        reload_script: RELOAD_SCRIPT
            .replace(RELOAD_PORT_PLACEHOLDER, &reload_port.to_string())
            .into(),
    };

    let mut router = Router::new().route(RELOAD_SCRIPT_PATH, get(handle_reload_script));

    let mount = config.public_path.trim_end_matches('/');
    if !mount.is_empty() {
        router = router.nest_service(mount, ServeDir::new(config.assets_dir()));
    }

    router
        .fallback(serve_current)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn handle_reload_script(State(state): State<AppState>) -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "application/javascript"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        state.reload_script.to_string(),
    )
}

/// Dispatch to the build generation that is current when the request arrives.
async fn serve_current(State(state): State<AppState>, request: Request) -> Response {
    let build = match state.slot.refresh() {
        Ok(build) => build,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load server build");
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    match build.router.oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    }
}

/// Serves the server build artifact itself for every path.
///
/// HTML artifacts get the reload client injected before `</body>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticAppLoader;

impl AppLoader for StaticAppLoader {
    fn load(&self, artifact: &Path, generation: u64) -> Result<Router, DevError> {
        let content = std::fs::read(artifact).map_err(|e| DevError::Load {
            path: artifact.to_path_buf(),
            reason: e.to_string(),
        })?;

        let content_type = determine_content_type(artifact);
        let body = Bytes::from(inject_reload_script(&content, content_type));

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(BUILD_GENERATION_HEADER.clone(), HeaderValue::from(generation));

        Ok(Router::new().fallback(move || {
            let headers = headers.clone();
            let body = body.clone();
            async move { (headers, body) }
        }))
    }
}

/// Inject the reload client into HTML content.
///
/// Adds the script tag before the closing `</body>`, or appends it.
fn inject_reload_script(content: &[u8], content_type: &str) -> Vec<u8> {
    if !content_type.starts_with("text/html") {
        return content.to_vec();
    }

    let html = String::from_utf8_lossy(content);
    let script_tag = format!(r#"<script src="{}"></script>"#, RELOAD_SCRIPT_PATH);

    if let Some(pos) = html.rfind("</body>") {
        let mut result = String::with_capacity(html.len() + script_tag.len() + 4);
        result.push_str(&html[..pos]);
        result.push_str("  ");
        result.push_str(&script_tag);
        result.push('\n');
        result.push_str(&html[pos..]);
        return result.into_bytes();
    }

    let mut result = html.into_owned();
    result.push('\n');
    result.push_str(&script_tag);
    result.into_bytes()
}

/// Determine content type from file extension.
fn determine_content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("");

    match extension {
        "html" | "htm" => "text/html; charset=utf-8",
        "js" | "mjs" | "cjs" => "application/javascript",
        "json" | "map" => "application/json",
        "css" => "text/css",
        "txt" => "text/plain; charset=utf-8",
        "svg" => "image/svg+xml",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

/// State of the app server listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unstarted,
    Starting,
    Listening,
    Stopped,
}

/// Owns the app server listener for one session.
///
/// Starts at most once. Stopping a listener that never reached
/// [`LifecycleState::Listening`] does nothing.
pub struct AppLifecycle {
    state: LifecycleState,
    shutdown: CancellationToken,
    server: Option<JoinHandle<std::io::Result<()>>>,
    local_addr: Option<SocketAddr>,
}

impl Default for AppLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl AppLifecycle {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Unstarted,
            shutdown: CancellationToken::new(),
            server: None,
            local_addr: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind `host:port` (all interfaces without a host) and start serving.
    ///
    /// `on_ready` runs once, right after the bind succeeded.
    pub async fn start<F>(
        &mut self,
        router: Router,
        host: Option<&str>,
        port: u16,
        on_ready: F,
    ) -> Result<SocketAddr, DevError>
    where
        F: FnOnce(&ReadyInfo),
    {
        if self.state != LifecycleState::Unstarted {
            return Err(DevError::Server(
                "app server can only be started once per session".to_string(),
            ));
        }
        self.state = LifecycleState::Starting;

        let bind_host = host.unwrap_or("0.0.0.0");
        let requested = format!("{}:{}", bind_host, port);

        let bound = match tokio::net::TcpListener::bind((bind_host, port)).await {
            Ok(listener) => listener.local_addr().map(|addr| (listener, addr)),
            Err(e) => Err(e),
        };
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(source) => {
                self.state = LifecycleState::Stopped;
                return Err(DevError::Bind {
                    what: "app server",
                    addr: requested,
                    source,
                });
            }
        };

        let shutdown = self.shutdown.clone();
        self.server = Some(tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
        }));
        self.local_addr = Some(local_addr);
        self.state = LifecycleState::Listening;
        tracing::debug!(%local_addr, "App server listening");

        on_ready(&ReadyInfo::resolve(host, local_addr.port()));

        Ok(local_addr)
    }

    /// Close the listener.
    pub async fn stop(&mut self) -> Result<(), DevError> {
        if self.state != LifecycleState::Listening {
            return Ok(());
        }

        self.shutdown.cancel();
        self.state = LifecycleState::Stopped;

        let Some(mut server) = self.server.take() else {
            return Ok(());
        };

        // Open keep-alive connections can hold a graceful shutdown forever.
        match tokio::time::timeout(STOP_TIMEOUT, &mut server).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(DevError::Server(e.to_string())),
            Ok(Err(e)) => Err(DevError::Server(format!("app server task failed: {}", e))),
            Err(_) => {
                server.abort();
                tracing::warn!("App server did not shut down in time, aborted");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::BuildGeneration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn project() -> (TempDir, DevConfig) {
        let dir = TempDir::new().unwrap();
        let config = DevConfig::for_root(dir.path());
        std::fs::create_dir_all(config.server_build_dir()).unwrap();
        std::fs::create_dir_all(config.assets_dir()).unwrap();
        (dir, config)
    }

    fn slot(config: &DevConfig, generation: &BuildGeneration) -> Arc<BuildSlot> {
        Arc::new(BuildSlot::new(
            config.server_build_dir(),
            config.server_build_file(),
            generation.clone(),
            Arc::new(StaticAppLoader),
        ))
    }

    async fn get_body(router: &Router, uri: &str) -> (Response, String) {
        let response = router
            .clone()
            .oneshot(Request::builder().uri(uri).body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        let (parts, body) = response.into_parts();
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        (
            Response::from_parts(parts, axum::body::Body::empty()),
            String::from_utf8_lossy(&bytes).into_owned(),
        )
    }

    #[test]
    fn test_inject_reload_script_with_body() {
        let html = b"<html><body><h1>Test</h1></body></html>";
        let result = String::from_utf8(inject_reload_script(html, "text/html")).unwrap();

        let script_pos = result.find(r#"<script src="/__kiln/reload.js"></script>"#).unwrap();
        let body_pos = result.find("</body>").unwrap();
        assert!(script_pos < body_pos);
    }

    #[test]
    fn test_inject_reload_script_without_body() {
        let result = inject_reload_script(b"<h1>Test</h1>", "text/html; charset=utf-8");
        assert!(String::from_utf8(result).unwrap().ends_with("</script>"));
    }

    #[test]
    fn test_inject_reload_script_non_html() {
        let js = b"console.log('test');";
        assert_eq!(inject_reload_script(js, "application/javascript"), js);
    }

    #[test]
    fn test_determine_content_type() {
        assert_eq!(determine_content_type(Path::new("build/index.html")), "text/html; charset=utf-8");
        assert_eq!(determine_content_type(Path::new("build/index.js")), "application/javascript");
        assert_eq!(determine_content_type(Path::new("build/blob")), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_requests_follow_build_generation() {
        let (_dir, config) = project();
        let generation = BuildGeneration::new();
        let router = app_router(&config, slot(&config, &generation), 8002);

        std::fs::write(config.server_build_file(), "<body>one</body>").unwrap();
        generation.advance();
        let (response, body) = get_body(&router, "/some/route").await;
        assert_eq!(response.headers()[&BUILD_GENERATION_HEADER], "1");
        assert!(body.contains("one"));
        assert!(body.contains(RELOAD_SCRIPT_PATH));
        assert!(response.headers().get("x-powered-by").is_none());

        // Written but not announced: still the old generation.
        std::fs::write(config.server_build_file(), "<body>two</body>").unwrap();
        let (_, body) = get_body(&router, "/").await;
        assert!(body.contains("one"));

        generation.advance();
        let (response, body) = get_body(&router, "/").await;
        assert_eq!(response.headers()[&BUILD_GENERATION_HEADER], "2");
        assert!(body.contains("two"));
    }

    #[tokio::test]
    async fn test_missing_artifact_is_server_error() {
        let (_dir, config) = project();
        let generation = BuildGeneration::new();
        generation.advance();
        let router = app_router(&config, slot(&config, &generation), 8002);

        let (response, _) = get_body(&router, "/").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_assets_served_under_public_path() {
        let (_dir, config) = project();
        std::fs::write(config.assets_dir().join("entry.js"), "export {}").unwrap();
        let router = app_router(&config, slot(&config, &BuildGeneration::new()), 8002);

        let (response, body) = get_body(&router, "/build/entry.js").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body, "export {}");
    }

    #[tokio::test]
    async fn test_reload_script_targets_control_port() {
        let (_dir, config) = project();
        let router = app_router(&config, slot(&config, &BuildGeneration::new()), 9123);

        let (_, body) = get_body(&router, RELOAD_SCRIPT_PATH).await;
        assert!(body.contains("9123"));
        assert!(!body.contains(RELOAD_PORT_PLACEHOLDER));
    }

    #[tokio::test]
    async fn test_lifecycle_start_and_stop() {
        let mut app = AppLifecycle::new();
        let ready_calls = AtomicUsize::new(0);

        let addr = app
            .start(Router::new(), Some("127.0.0.1"), 0, |info| {
                ready_calls.fetch_add(1, Ordering::SeqCst);
                assert!(info.message().contains("127.0.0.1"));
            })
            .await
            .unwrap();

        assert_eq!(ready_calls.load(Ordering::SeqCst), 1);
        assert_eq!(app.state(), LifecycleState::Listening);
        assert_eq!(app.local_addr(), Some(addr));

        let second = app.start(Router::new(), Some("127.0.0.1"), 0, |_| {}).await;
        assert!(second.is_err());

        app.stop().await.unwrap();
        assert_eq!(app.state(), LifecycleState::Stopped);
        app.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_before_start_is_noop() {
        let mut app = AppLifecycle::new();
        app.stop().await.unwrap();
        assert_eq!(app.state(), LifecycleState::Unstarted);
    }

    #[tokio::test]
    async fn test_bind_failure_stops_lifecycle() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let mut app = AppLifecycle::new();
        let result = app.start(Router::new(), Some("127.0.0.1"), port, |_| {
            panic!("must not report ready");
        });
        assert!(matches!(result.await, Err(DevError::Bind { .. })));
        assert_eq!(app.state(), LifecycleState::Stopped);
    }
}
