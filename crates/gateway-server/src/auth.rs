//! API key gate in front of gateway traffic.
//!
//! Keys are validated by whichever service is registered under the auth
//! service name. What happens when that service is missing or misbehaving is
//! decided by [`AuthPolicy`](crate::types::AuthPolicy).

use crate::error::ApiError;
use crate::metrics::MetricsRegistry;
use crate::registry::Registry;
use crate::types::{AuthSettings, FailPolicy, ServiceRegistration};
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use common::{Error, Result};
use healthcheck::types::HostResolution;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Why a request was let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    /// Key validated by the auth backend
    Allowed,
    /// Route is on the allow-list
    Exempt,
    /// No auth backend registered
    FailOpenAbsent,
    /// Auth backend did not give a usable answer
    FailOpenDegraded,
}

impl AuthDecision {
    pub fn label(&self) -> &'static str {
        match self {
            AuthDecision::Allowed => "allowed",
            AuthDecision::Exempt => "exempt",
            AuthDecision::FailOpenAbsent => "fail_open_absent",
            AuthDecision::FailOpenDegraded => "fail_open_degraded",
        }
    }
}

#[derive(Debug, Serialize)]
struct ValidateRequest<'a> {
    key: &'a str,
    service: &'a str,
}

#[derive(Debug, Deserialize)]
struct ValidateResponse {
    data: ValidateData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateData {
    is_valid: bool,
}

/// Validates `x-api-key` against the registered auth backend.
pub struct AuthGate {
    registry: Arc<Registry>,
    client: reqwest::Client,
    settings: AuthSettings,
    resolution: HostResolution,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl AuthGate {
    pub fn new(
        registry: Arc<Registry>,
        settings: AuthSettings,
        resolution: HostResolution,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> std::result::Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;

        Ok(Self {
            registry,
            client,
            settings,
            resolution,
            metrics,
        })
    }

    /// Decide whether a gateway request may proceed.
    pub async fn authorize(
        &self,
        method: &str,
        path: &str,
        api_key: Option<&str>,
    ) -> Result<AuthDecision> {
        let outcome = self.decide(method, path, api_key).await;

        if let Some(ref m) = self.metrics {
            match &outcome {
                Ok(decision) => m.record_auth_decision(decision.label()),
                Err(_) => m.record_auth_decision("rejected"),
            }
        }

        outcome
    }

    async fn decide(&self, method: &str, path: &str, api_key: Option<&str>) -> Result<AuthDecision> {
        if self.settings.exempt.iter().any(|r| r.matches(method, path)) {
            return Ok(AuthDecision::Exempt);
        }

        let Some(auth_service) = self.registry.get(&self.settings.service_name) else {
            return match self.settings.policy.when_absent {
                FailPolicy::FailOpen => {
                    warn!(path, "Auth service is not registered; allowing request");
                    Ok(AuthDecision::FailOpenAbsent)
                }
                FailPolicy::FailClosed => {
                    warn!(path, "Auth service is not registered; rejecting request");
                    Err(Error::upstream_unavailable(
                        "Authentication service is not available",
                    ))
                }
            };
        };

        let Some(key) = api_key.filter(|k| !k.is_empty()) else {
            return Err(Error::unauthorized("API key is required"));
        };

        let target_service = path.trim_start_matches('/').split('/').next().unwrap_or("");

        match self.validate(&auth_service, key, target_service).await {
            Ok(true) => {
                debug!(service = target_service, "API key accepted");
                Ok(AuthDecision::Allowed)
            }
            Ok(false) => {
                warn!(service = target_service, "Invalid API key");
                Err(Error::unauthorized("Invalid API key"))
            }
            Err(reason) => match self.settings.policy.when_unreachable {
                FailPolicy::FailOpen => {
                    warn!(
                        service = target_service,
                        reason = %reason,
                        "Auth service validation failed; allowing request (degraded)"
                    );
                    Ok(AuthDecision::FailOpenDegraded)
                }
                FailPolicy::FailClosed => {
                    warn!(
                        service = target_service,
                        reason = %reason,
                        "Auth service validation failed; rejecting request"
                    );
                    Err(Error::upstream_unavailable(
                        "Authentication service is unavailable",
                    ))
                }
            },
        }
    }

    /// Ask the auth backend about a key. `Err` carries why no usable answer came back.
    async fn validate(
        &self,
        auth_service: &ServiceRegistration,
        key: &str,
        service: &str,
    ) -> std::result::Result<bool, String> {
        let url = format!(
            "{}/{}/{}/keys/validate",
            auth_service.resolved_base_url(&self.resolution),
            auth_service.name,
            auth_service.version
        );

        let response = self
            .client
            .post(&url)
            .json(&ValidateRequest { key, service })
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("auth service answered {}", response.status()));
        }

        let answer: ValidateResponse = response
            .json()
            .await
            .map_err(|e| format!("unparseable answer: {}", e))?;

        Ok(answer.data.is_valid)
    }
}

/// Middleware applying [`AuthGate`] to gateway routes.
pub async fn auth_gate(
    State(gate): State<Arc<AuthGate>>,
    request: Request,
    next: Next,
) -> std::result::Result<Response, ApiError> {
    let api_key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let method = request.method().as_str().to_string();
    let path = request.uri().path().to_string();

    gate.authorize(&method, &path, api_key.as_deref()).await?;

    Ok(next.run(request).await)
}
