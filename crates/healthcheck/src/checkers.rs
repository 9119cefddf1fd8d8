//! Health check implementations.

use crate::types::{HealthCheckConfig, HealthCheckResult, HostResolution, ProbeTarget};
use async_trait::async_trait;
use std::error::Error as _;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Health checker trait
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Probe a target once
    async fn check(&self, target: &ProbeTarget) -> HealthCheckResult;

    /// Get the name of this checker
    fn name(&self) -> &str;
}

/// HTTP health checker: GET `<resolved-host>:<port><path>`, healthy on 2xx.
pub struct HttpChecker {
    client: reqwest::Client,
    timeout_duration: Duration,
    resolution: HostResolution,
}

impl HttpChecker {
    /// Create a new HTTP health checker
    pub fn new(config: &HealthCheckConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            timeout_duration: config.timeout,
            resolution: config.resolution.clone(),
        })
    }

    /// URL probed for a target under the configured resolution rule
    pub fn url_for(&self, target: &ProbeTarget) -> String {
        format!(
            "http://{}:{}{}",
            self.resolution.hostname(target),
            target.port,
            target.path
        )
    }
}

#[async_trait]
impl HealthChecker for HttpChecker {
    async fn check(&self, target: &ProbeTarget) -> HealthCheckResult {
        let url = self.url_for(target);
        let start = Instant::now();

        match timeout(self.timeout_duration, self.client.get(&url).send()).await {
            Ok(Ok(response)) => {
                let duration = start.elapsed();
                let status_code = response.status().as_u16();

                if response.status().is_success() {
                    debug!(service = %target.service, url = %url, status = status_code,
                           duration_ms = duration.as_millis(), "HTTP check successful");
                    HealthCheckResult::healthy(duration, status_code)
                } else {
                    warn!(service = %target.service, url = %url, status = status_code,
                          "HTTP check failed: unexpected status code");
                    HealthCheckResult::unhealthy(duration, status_code)
                }
            }
            Ok(Err(e)) => {
                let duration = start.elapsed();
                if e.is_timeout() {
                    warn!(service = %target.service, url = %url, "HTTP check timed out");
                    HealthCheckResult::timeout(duration)
                } else if is_connection_refused(&e) {
                    warn!(service = %target.service, url = %url, "HTTP check refused");
                    HealthCheckResult::refused(duration, format!("Connection refused: {}", url))
                } else {
                    warn!(service = %target.service, url = %url, error = %e, "HTTP check failed");
                    HealthCheckResult::error(duration, format!("HTTP request failed: {}", e))
                }
            }
            Err(_) => {
                let duration = start.elapsed();
                warn!(service = %target.service, url = %url, "HTTP check timed out");
                HealthCheckResult::timeout(duration)
            }
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Whether a request failed because the peer refused the connection.
pub fn is_connection_refused(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        source = cause.source();
    }
    false
}
