//! Listening socket, accept loop and running/stopped state

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use axum::{
    extract::State,
    http::{HeaderMap, Method, Uri},
    response::Response,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::address;
use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::path;
use crate::response;

/// A bound listener and the task serving it
struct RunningServer {
    origin: String,
    addr: SocketAddr,
    config: ServerConfig,
    registration: u64,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl RunningServer {
    fn is_alive(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Static file server engine
///
/// Holds at most one running server. Callers serialize access; the
/// control facade keeps the engine behind a mutex.
pub struct ServerEngine {
    running: Option<RunningServer>,
    shutdown_grace: Duration,
}

impl ServerEngine {
    /// Create a stopped engine
    ///
    /// # Arguments
    /// * `shutdown_grace` - How long `stop` waits for in-flight responses
    pub fn new(shutdown_grace: Duration) -> Self {
        Self {
            running: None,
            shutdown_grace,
        }
    }

    /// Bind and start serving, or return the current origin if already running
    ///
    /// If the address is already held by a live listener of this process,
    /// that listener's origin is returned instead of an error.
    pub async fn start(&mut self, config: &ServerConfig) -> Result<String> {
        if let Some(running) = self.running.as_ref().filter(|r| r.is_alive()) {
            tracing::info!("Static server already running at {}", running.origin);
            return Ok(running.origin.clone());
        }

        if let Some(dead) = self.running.take() {
            tracing::warn!("Serve task for {} exited unexpectedly", dead.origin);
            unregister(dead.addr, dead.registration);
        }

        let target = address::resolve(config.local_only, config.port).await?;
        let requested = target.socket_addr();

        let listener = match TcpListener::bind(requested).await {
            Ok(listener) => listener,
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                if let Some(origin) = registered_origin(requested) {
                    tracing::warn!("{} is already served by this process at {}", requested, origin);
                    return Ok(origin);
                }
                return Err(ServerError::Bind { addr: requested, source: e });
            }
            Err(e) => return Err(ServerError::Bind { addr: requested, source: e }),
        };

        let addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr: requested, source })?;
        let origin = target.origin();
        let registration = register(addr, &origin);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(config.root.clone());

        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;

            if let Err(e) = result {
                tracing::error!("Static server on {} failed: {}", addr, e);
            }
            unregister(addr, registration);
        });

        tracing::info!(
            "Static server listening on {} serving {} ({})",
            addr,
            config.root.display(),
            origin
        );

        self.running = Some(RunningServer {
            origin: origin.clone(),
            addr,
            config: config.clone(),
            registration,
            shutdown_tx,
            task,
        });

        Ok(origin)
    }

    /// Stop accepting and close the listener; no-op when stopped
    ///
    /// In-flight responses get up to the shutdown grace period to finish.
    /// After that the engine stops waiting for them.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.shutdown_tx.send(());
        unregister(running.addr, running.registration);

        let mut task = running.task;
        match tokio::time::timeout(self.shutdown_grace, &mut task).await {
            Ok(_) => tracing::info!("Stopped static server at {}", running.origin),
            Err(_) => tracing::warn!(
                "Stopped static server at {} with connections still draining after {:?}",
                running.origin,
                self.shutdown_grace
            ),
        }
    }

    /// Whether a listener is bound and its accept loop is alive
    pub fn is_running(&self) -> bool {
        self.running.as_ref().is_some_and(RunningServer::is_alive)
    }

    /// Origin of the running server
    pub fn origin(&self) -> Option<&str> {
        self.running
            .as_ref()
            .filter(|r| r.is_alive())
            .map(|r| r.origin.as_str())
    }

    /// Address the running server is bound to
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().filter(|r| r.is_alive()).map(|r| r.addr)
    }

    /// Configuration of the running server
    pub fn config(&self) -> Option<&ServerConfig> {
        self.running
            .as_ref()
            .filter(|r| r.is_alive())
            .map(|r| &r.config)
    }
}

/// Axum router serving every path from `root`
pub fn router(root: PathBuf) -> Router {
    Router::new()
        .fallback(serve_request)
        .with_state(Arc::new(root))
        .layer(TraceLayer::new_for_http())
}

async fn serve_request(
    State(root): State<Arc<PathBuf>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let mapping = path::resolve(&root, &method, uri.path()).await;
    response::build(&mapping, &headers).await
}

struct Registration {
    id: u64,
    origin: String,
}

/// Addresses currently held by live listeners in this process
static LISTENERS: OnceLock<Mutex<HashMap<SocketAddr, Registration>>> = OnceLock::new();

static NEXT_REGISTRATION: AtomicU64 = AtomicU64::new(1);

fn listeners() -> &'static Mutex<HashMap<SocketAddr, Registration>> {
    LISTENERS.get_or_init(|| Mutex::new(HashMap::new()))
}

fn register(addr: SocketAddr, origin: &str) -> u64 {
    let id = NEXT_REGISTRATION.fetch_add(1, Ordering::Relaxed);
    let mut map = listeners().lock().unwrap_or_else(|e| e.into_inner());
    map.insert(
        addr,
        Registration {
            id,
            origin: origin.to_string(),
        },
    );
    id
}

/// Remove `addr` only if it still belongs to registration `id`
fn unregister(addr: SocketAddr, id: u64) {
    let mut map = listeners().lock().unwrap_or_else(|e| e.into_inner());
    if map.get(&addr).is_some_and(|r| r.id == id) {
        map.remove(&addr);
    }
}

fn registered_origin(addr: SocketAddr) -> Option<String> {
    let map = listeners().lock().unwrap_or_else(|e| e.into_inner());
    map.get(&addr).map(|r| r.origin.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use std::fs;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn create_test_root() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let www = dir.path().join("www");
        fs::create_dir_all(www.join("empty")).unwrap();
        fs::write(www.join("index.html"), "<html>OK</html>").unwrap();
        fs::write(dir.path().join("secret.txt"), "secret").unwrap();
        let root = www.canonicalize().unwrap();
        (dir, root)
    }

    fn local_config(root: PathBuf, port: Option<u16>) -> ServerConfig {
        ServerConfig {
            root,
            port,
            local_only: true,
            keep_alive: false,
        }
    }

    fn create_test_engine() -> ServerEngine {
        ServerEngine::new(Duration::from_secs(1))
    }

    async fn free_port() -> u16 {
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        probe.local_addr().unwrap().port()
    }

    async fn get(app: Router, method: Method, uri: &str) -> (StatusCode, HeaderMap, String) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_router_serves_index() {
        let (_dir, root) = create_test_root();
        let (status, headers, body) = get(router(root), Method::GET, "/index.html").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(body, "<html>OK</html>");
    }

    #[tokio::test]
    async fn test_router_ignores_query_string() {
        let (_dir, root) = create_test_root();
        let (status, _, body) = get(router(root.clone()), Method::GET, "/index.html?v=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "<html>OK</html>");

        let (status, _, body) = get(router(root), Method::GET, "/?cache=bust&x=%2e%2e").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "<html>OK</html>");
    }

    #[tokio::test]
    async fn test_network_start_serves_requests() {
        let (_dir, root) = create_test_root();
        let mut engine = create_test_engine();
        let config = ServerConfig {
            local_only: false,
            ..local_config(root, None)
        };

        let origin = engine.start(&config).await.unwrap();
        assert!(!origin.contains("localhost"));

        let port = engine.local_addr().unwrap().port();
        let response = reqwest::get(format!("{}/index.html?v=1", origin)).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), "<html>OK</html>");
        assert!(origin.ends_with(&format!(":{}", port)));

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_router_directory_index_fallback() {
        let (_dir, root) = create_test_root();
        let (status, _, body) = get(router(root.clone()), Method::GET, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "<html>OK</html>");

        let (status, _, body) = get(router(root), Method::GET, "/empty/").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "");
    }

    #[tokio::test]
    async fn test_router_rejects_traversal() {
        let (_dir, root) = create_test_root();
        let (status, _, body) = get(router(root), Method::GET, "/../secret.txt").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(!body.contains("secret"));
    }

    #[tokio::test]
    async fn test_router_rejects_non_get() {
        let (_dir, root) = create_test_root();
        let (status, headers, _) = get(router(root), Method::POST, "/index.html").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (_dir, root) = create_test_root();
        let mut engine = create_test_engine();
        let config = local_config(root, None);

        let first = engine.start(&config).await.unwrap();
        let addr = engine.local_addr().unwrap();
        let second = engine.start(&config).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(engine.local_addr(), Some(addr));
        assert!(first.starts_with("http://localhost:"));
        assert!(engine.is_running());

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_stop_then_start() {
        let (_dir, root) = create_test_root();
        let mut engine = create_test_engine();
        let config = local_config(root, None);

        engine.start(&config).await.unwrap();
        let addr = engine.local_addr().unwrap();
        engine.stop().await;

        assert!(!engine.is_running());
        assert!(engine.origin().is_none());
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());

        let origin = engine.start(&config).await.unwrap();
        assert!(engine.is_running());
        assert_eq!(engine.origin(), Some(origin.as_str()));
        assert_eq!(engine.config(), Some(&config));

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        let mut engine = create_test_engine();
        engine.stop().await;
        engine.stop().await;
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_explicit_port_origin() {
        let (_dir, root) = create_test_root();
        let mut engine = create_test_engine();
        let port = free_port().await;

        let origin = engine.start(&local_config(root, Some(port))).await.unwrap();
        assert_eq!(origin, format!("http://localhost:{}", port));

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_foreign_listener_is_bind_error() {
        let (_dir, root) = create_test_root();
        let foreign = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = foreign.local_addr().unwrap().port();

        let mut engine = create_test_engine();
        let err = engine.start(&local_config(root, Some(port))).await.unwrap_err();

        assert!(matches!(err, ServerError::Bind { .. }));
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_address_owned_by_this_process_is_reused() {
        let (_dir, root) = create_test_root();
        let port = free_port().await;
        let config = local_config(root, Some(port));

        let mut first = create_test_engine();
        let origin = first.start(&config).await.unwrap();

        let mut second = create_test_engine();
        let recovered = second.start(&config).await.unwrap();
        assert_eq!(recovered, origin);

        first.stop().await;
        assert!(registered_origin(SocketAddr::from(([127, 0, 0, 1], port))).is_none());
    }

    #[test]
    fn test_unregister_ignores_stale_registration() {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let old = register(addr, "http://localhost:1");
        let new = register(addr, "http://localhost:1");

        unregister(addr, old);
        assert!(registered_origin(addr).is_some());

        unregister(addr, new);
        assert!(registered_origin(addr).is_none());
    }
}
