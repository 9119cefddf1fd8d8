#![allow(dead_code)] // Each test binary uses a different subset

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{
        HeaderMap, HeaderName, Method, StatusCode, Uri,
        header::{CONTENT_TYPE, LOCATION},
    },
    response::{IntoResponse, Response},
};
use gateway_server::{
    Components, GatewayServer, ServerConfig, ServiceRegistration,
    types::{AuthSettings, ServiceMetadata},
};
use healthcheck::types::HealthCheckConfig;
use serde_json::{Value, json};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const REGISTRY_KEY: &str = "test-registry-key";
pub const VALID_API_KEY: &str = "valid-key";

const WAIT_ATTEMPTS: usize = 50;
const WAIT_DELAY: Duration = Duration::from_millis(50);

/// Find an available TCP port
pub async fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[derive(Clone)]
struct BackendState {
    health_status: Arc<AtomicU16>,
    hits: Arc<AtomicUsize>,
}

/// A fake backend service answering every path.
///
/// - `*/health` answers with the configured status
/// - `*/keys/validate` accepts [`VALID_API_KEY`] only
/// - `*/error` answers 422 with a JSON body
/// - `*/empty-error` answers 500 with no body
/// - `*/redirect` answers 302 to `/moved` with a custom header
/// - anything else echoes the request as JSON
pub struct MockBackend {
    pub port: u16,
    health_status: Arc<AtomicU16>,
    hits: Arc<AtomicUsize>,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock backend listener");
        let port = listener.local_addr().unwrap().port();

        let state = BackendState {
            health_status: Arc::new(AtomicU16::new(200)),
            hits: Arc::new(AtomicUsize::new(0)),
        };
        let app = Router::new().fallback(backend).with_state(state.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(err) = server.await {
                eprintln!("mock backend error: {}", err);
            }
        });

        Self {
            port,
            health_status: state.health_status,
            hits: state.hits,
            shutdown_tx,
            handle,
        }
    }

    pub fn set_health(&self, status: u16) {
        self.health_status.store(status, Ordering::SeqCst);
    }

    /// Requests seen on non-health paths
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn registration(&self, name: &str, version: &str) -> ServiceRegistration {
        registration_for(name, version, self.port)
    }

    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}

pub fn registration_for(name: &str, version: &str, port: u16) -> ServiceRegistration {
    ServiceRegistration {
        name: name.to_string(),
        host: "127.0.0.1".to_string(),
        port,
        version: version.to_string(),
        semantic_version: None,
        health_endpoint: format!("/{}/{}/health", name, version),
        timestamp: None,
        metadata: ServiceMetadata::default(),
    }
}

async fn backend(
    State(state): State<BackendState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path();

    if path.ends_with("/health") {
        let status = StatusCode::from_u16(state.health_status.load(Ordering::SeqCst))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, axum::Json(json!({ "status": status.as_u16() }))).into_response();
    }

    state.hits.fetch_add(1, Ordering::SeqCst);

    if path.ends_with("/keys/validate") {
        let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        let is_valid = request["key"] == VALID_API_KEY;
        return axum::Json(json!({
            "success": true,
            "data": { "isValid": is_valid, "service": request["service"] },
        }))
        .into_response();
    }

    if path.ends_with("/empty-error") {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    if path.ends_with("/redirect") {
        return (
            StatusCode::FOUND,
            [(LOCATION, "/moved"), (HeaderName::from_static("x-backend"), "mock")],
        )
            .into_response();
    }

    if path.ends_with("/error") {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            axum::Json(json!({ "message": "title is required" })),
        )
            .into_response();
    }

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    axum::Json(json!({
        "method": method.as_str(),
        "path": path,
        "query": uri.query(),
        "contentType": content_type,
        "body": String::from_utf8_lossy(&body),
    }))
    .into_response()
}

/// Test configuration: short heartbeats, registry key set, metrics off.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        gateway_addr: "127.0.0.1:0".to_string(),
        registry_addr: "127.0.0.1:0".to_string(),
        registry_key: Some(REGISTRY_KEY.to_string()),
        heartbeat_interval: Duration::from_millis(200),
        health: HealthCheckConfig {
            timeout: Duration::from_millis(500),
            ..Default::default()
        },
        forward_timeout: Duration::from_secs(2),
        auth: AuthSettings::default(),
        metrics_enabled: false,
        ..Default::default()
    }
}

/// A gateway server running both surfaces on ephemeral ports.
pub struct TestGateway {
    pub gateway_url: String,
    pub registry_url: String,
    pub registry: Arc<gateway_server::Registry>,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl TestGateway {
    pub async fn start(config: ServerConfig) -> Self {
        let server = GatewayServer::new(config);
        let components = server.build().expect("failed to build gateway");
        Self::serve(server, components).await
    }

    pub async fn serve(server: GatewayServer, components: Components) -> Self {
        let gateway = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let registry = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let gateway_url = format!("http://{}", gateway.local_addr().unwrap());
        let registry_url = format!("http://{}", registry.local_addr().unwrap());
        let registry_handle = components.registry.clone();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.await;
            };
            if let Err(err) = server.serve(components, gateway, registry, shutdown).await {
                eprintln!("gateway server error: {}", err);
            }
        });

        Self {
            gateway_url,
            registry_url,
            registry: registry_handle,
            shutdown_tx,
            handle,
        }
    }

    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}

/// Poll `f` until it yields `Some`, or give up.
pub async fn poll_until<F, Fut, T>(mut f: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for _ in 0..WAIT_ATTEMPTS {
        if let Some(value) = f().await {
            return Some(value);
        }
        tokio::time::sleep(WAIT_DELAY).await;
    }
    None
}
