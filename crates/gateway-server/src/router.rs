//! Gateway router: resolve `{service, version}` and forward the call.

use crate::metrics::MetricsRegistry;
use crate::registry::Registry;
use crate::types::{ServiceEndpoint, ServiceRegistration};
use bytes::Bytes;
use common::{Error, Result};
use healthcheck::checkers::is_connection_refused;
use reqwest::Method;
use reqwest::header::{self, CONTENT_TYPE, HeaderMap, HeaderName};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Request body as received by the gateway
#[derive(Debug, Clone, Default)]
pub struct Payload {
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Backend answer, passed back to the caller untouched
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: u16,
    /// End-to-end headers only
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyResponse {
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }
}

// Connection-scoped headers, plus the framing the gateway recomputes.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::CONTENT_LENGTH,
];

fn end_to_end(headers: &HeaderMap) -> HeaderMap {
    let mut kept = headers.clone();
    for name in &HOP_BY_HOP {
        kept.remove(name);
    }
    kept.remove("keep-alive");
    kept
}

/// Routes client traffic to registered services.
pub struct GatewayRouter {
    registry: Arc<Registry>,
    client: reqwest::Client,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl GatewayRouter {
    pub fn new(
        registry: Arc<Registry>,
        timeout: Duration,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> std::result::Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            registry,
            client,
            metrics,
        })
    }

    /// `http://<host>:<port>/<service>/<version>[/<path>][?<query>]`
    pub fn target_url(
        &self,
        registration: &ServiceRegistration,
        version: &str,
        path: &str,
        query: Option<&str>,
    ) -> String {
        let mut url = format!(
            "{}/{}/{}",
            registration.base_url(),
            registration.name,
            version
        );

        let path = path.trim_start_matches('/');
        if !path.is_empty() {
            url.push('/');
            url.push_str(path);
        }

        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }

        url
    }

    /// Forward one call to `service`.
    pub async fn route_request(
        &self,
        method: Method,
        service: &str,
        version: &str,
        path: &str,
        query: Option<&str>,
        payload: Payload,
    ) -> Result<ProxyResponse> {
        let start = Instant::now();

        let Some(resolved) = self.registry.resolve(service) else {
            debug!(service, "Route to unregistered service");
            self.record(service, "not_registered", start);
            return Err(Error::not_registered(service));
        };

        let url = self.target_url(&resolved.registration, version, path, query);
        debug!(service, method = %method, url = %url, "Forwarding request");

        let mut request = self.client.request(method, &url).body(payload.body);
        if let Some(content_type) = payload.content_type {
            request = request.header(CONTENT_TYPE, content_type);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_connect() || e.is_timeout() || is_connection_refused(&e) => {
                warn!(service, url = %url, error = %e, "Service unreachable");
                let evicted = match resolved.generation {
                    Some(generation) => self.registry.evict_if_current(service, generation).await,
                    None => false,
                };
                debug!(service, evicted, "Best-effort eviction after routing failure");
                self.record(service, "unavailable", start);
                return Err(Error::upstream_unavailable(format!(
                    "Service {} is unavailable",
                    service
                )));
            }
            Err(e) => {
                warn!(service, url = %url, error = %e, "Forwarding failed");
                self.record(service, "upstream_error", start);
                return Err(Error::upstream(500, "Service error"));
            }
        };

        let status = response.status().as_u16();
        let headers = end_to_end(response.headers());

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                warn!(service, url = %url, error = %e, "Failed to read backend response");
                self.record(service, "upstream_error", start);
                return Err(Error::upstream(status, "Service error"));
            }
        };

        if !(200..400).contains(&status) && body.is_empty() {
            self.record(service, "upstream_error", start);
            return Err(Error::upstream(status, "Service error"));
        }

        let outcome = if (200..400).contains(&status) {
            "ok"
        } else {
            "upstream_error"
        };
        self.record(service, outcome, start);

        Ok(ProxyResponse {
            status,
            headers,
            body,
        })
    }

    /// Public view of every registration, sorted by service name
    pub fn service_endpoints(&self) -> Vec<ServiceEndpoint> {
        self.registry
            .list()
            .into_iter()
            .map(|registration| {
                let endpoint = format!("/{}/{}", registration.name, registration.version);
                ServiceEndpoint {
                    url: format!("{}{}", registration.base_url(), endpoint),
                    service: registration.name,
                    endpoint,
                    version: registration.version,
                    status: "registered".to_string(),
                }
            })
            .collect()
    }

    fn record(&self, service: &str, outcome: &str, start: Instant) {
        if let Some(ref m) = self.metrics {
            m.record_proxy(service, outcome, start.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::types::ServiceMetadata;
    use healthcheck::checkers::HttpChecker;
    use healthcheck::types::HealthCheckConfig;

    fn router() -> GatewayRouter {
        let checker = Arc::new(HttpChecker::new(&HealthCheckConfig::default()).unwrap());
        let registry = Registry::new(
            Arc::new(InMemoryStore::new()),
            checker,
            Duration::from_secs(60),
            16,
            None,
        );
        GatewayRouter::new(registry, Duration::from_secs(1), None).unwrap()
    }

    fn registration() -> ServiceRegistration {
        ServiceRegistration {
            name: "posts".to_string(),
            host: "localhost".to_string(),
            port: 4000,
            version: "v1".to_string(),
            semantic_version: None,
            health_endpoint: "/posts/v1/health".to_string(),
            timestamp: None,
            metadata: ServiceMetadata::default(),
        }
    }

    #[tokio::test]
    async fn test_target_url() {
        let router = router();
        let reg = registration();

        assert_eq!(
            router.target_url(&reg, "v1", "", None),
            "http://localhost:4000/posts/v1"
        );
        assert_eq!(
            router.target_url(&reg, "v2", "comments/7", Some("page=2&sort=desc")),
            "http://localhost:4000/posts/v2/comments/7?page=2&sort=desc"
        );
        assert_eq!(
            router.target_url(&reg, "v1", "/nested", Some("")),
            "http://localhost:4000/posts/v1/nested"
        );
    }

    #[tokio::test]
    async fn test_target_url_uses_declared_host() {
        let router = router();
        let mut reg = registration();
        reg.host = "10.1.2.3".to_string();

        assert_eq!(
            router.target_url(&reg, "v1", "", None),
            "http://10.1.2.3:4000/posts/v1"
        );
    }

    #[test]
    fn test_hop_by_hop_headers_are_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::LOCATION, "/posts/v1/7".parse().unwrap());
        headers.insert(CONTENT_TYPE, "application/json".parse().unwrap());
        headers.insert("x-request-id", "abc".parse().unwrap());
        headers.insert(header::CONNECTION, "close".parse().unwrap());
        headers.insert(header::TRANSFER_ENCODING, "chunked".parse().unwrap());
        headers.insert(header::CONTENT_LENGTH, "12".parse().unwrap());
        headers.insert("keep-alive", "timeout=5".parse().unwrap());

        let kept = end_to_end(&headers);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[header::LOCATION], "/posts/v1/7");
        assert_eq!(kept["x-request-id"], "abc");

        let answer = ProxyResponse {
            status: 200,
            headers: kept,
            body: Bytes::new(),
        };
        assert_eq!(answer.content_type(), Some("application/json"));
    }

    #[tokio::test]
    async fn test_unregistered_service() {
        let router = router();
        let err = router
            .route_request(Method::GET, "ghost", "v1", "", None, Payload::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "NotRegistered");
        assert_eq!(err.to_string(), "Service ghost is not registered or unavailable");
    }

    #[tokio::test]
    async fn test_service_endpoints_empty() {
        assert!(router().service_endpoints().is_empty());
    }
}
