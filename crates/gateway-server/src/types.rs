//! Types shared by the registry, the router and the HTTP surfaces.

use chrono::{DateTime, Utc};
use healthcheck::types::{HealthCheckConfig, HostResolution, ProbeTarget};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Runtime configuration assembled from the YAML file and CLI overrides.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Gateway (client traffic) listen address
    pub gateway_addr: String,

    /// Registry surface listen address
    pub registry_addr: String,

    /// Shared secret expected in `x-registry-key`
    pub registry_key: Option<String>,

    /// What the registry guard does when no key is configured
    pub when_unconfigured: FailPolicy,

    /// Honour `x-forwarded-for` / `x-real-ip` when classifying callers
    pub trust_forwarded_headers: bool,

    /// Interval between heartbeat probes
    pub heartbeat_interval: Duration,

    /// Probe timeout and host resolution
    pub health: HealthCheckConfig,

    /// Capacity of the heartbeat failure channel
    pub channel_size: usize,

    /// Timeout for forwarded requests
    pub forward_timeout: Duration,

    /// Auth gate settings
    pub auth: AuthSettings,

    /// Serve Prometheus metrics
    pub metrics_enabled: bool,

    /// Metrics listen address
    pub metrics_listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            gateway_addr: "0.0.0.0:3000".to_string(),
            registry_addr: "0.0.0.0:3001".to_string(),
            registry_key: None,
            when_unconfigured: FailPolicy::FailClosed,
            trust_forwarded_headers: true,
            heartbeat_interval: Duration::from_secs(30),
            health: HealthCheckConfig::default(),
            channel_size: 256,
            forward_timeout: Duration::from_secs(10),
            auth: AuthSettings::default(),
            metrics_enabled: true,
            metrics_listen_addr: "127.0.0.1:9464".to_string(),
        }
    }
}

/// Whether a missing or failing dependency lets traffic through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailPolicy {
    FailOpen,
    FailClosed,
}

/// Fail policies of the auth gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthPolicy {
    /// No auth backend registered
    pub when_absent: FailPolicy,
    /// Auth backend registered but unreachable or answering garbage
    pub when_unreachable: FailPolicy,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            when_absent: FailPolicy::FailOpen,
            when_unreachable: FailPolicy::FailOpen,
        }
    }
}

/// Auth gate settings.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Registry name of the auth backend
    pub service_name: String,
    pub policy: AuthPolicy,
    /// Timeout for a key validation call
    pub timeout: Duration,
    /// Routes that bypass the gate
    pub exempt: Vec<ExemptRoute>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            service_name: "auth".to_string(),
            policy: AuthPolicy::default(),
            timeout: Duration::from_secs(5),
            exempt: ExemptRoute::defaults(),
        }
    }
}

/// A route that bypasses the auth gate.
///
/// `path` is matched exactly, or as a suffix when it starts with `*`.
/// A missing method matches every method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExemptRoute {
    #[serde(default)]
    pub method: Option<String>,
    pub path: String,
}

impl ExemptRoute {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: Some(method.to_string()),
            path: path.to_string(),
        }
    }

    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("POST", "/auth/v1/keys"),
            Self::new("POST", "/auth/v1/keys/validate"),
            Self::new("GET", "/health"),
            Self::new("GET", "/ping"),
            Self::new("GET", "/registry/ping"),
            Self::new("GET", "*/health"),
        ]
    }

    pub fn matches(&self, method: &str, path: &str) -> bool {
        if let Some(expected) = &self.method
            && !expected.eq_ignore_ascii_case(method)
        {
            return false;
        }

        let path = path.trim_end_matches('/');
        let path = if path.is_empty() { "/" } else { path };

        match self.path.strip_prefix('*') {
            Some(suffix) => path.ends_with(suffix),
            None => path == self.path,
        }
    }
}

/// Free-form metadata attached to a registration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A backend's announcement of where it lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServiceRegistration {
    #[validate(length(min = 1, max = 64), custom = "validate_path_segment")]
    pub name: String,

    #[serde(default = "default_host")]
    #[validate(length(min = 1, max = 253))]
    pub host: String,

    #[validate(range(min = 1))]
    pub port: u16,

    #[validate(length(min = 1, max = 32), custom = "validate_path_segment")]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_version: Option<String>,

    #[validate(custom = "validate_health_endpoint")]
    pub health_endpoint: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default)]
    pub metadata: ServiceMetadata,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn validate_path_segment(value: &str) -> Result<(), ValidationError> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !valid {
        return Err(ValidationError::new("invalid_path_segment"));
    }
    Ok(())
}

fn validate_health_endpoint(value: &str) -> Result<(), ValidationError> {
    if !value.starts_with('/') || value.chars().any(char::is_whitespace) {
        return Err(ValidationError::new("health_endpoint_invalid_format"));
    }
    Ok(())
}

impl ServiceRegistration {
    /// Where the prober should look for this service
    pub fn probe_target(&self) -> ProbeTarget {
        ProbeTarget {
            service: self.name.clone(),
            host: self.host.clone(),
            port: self.port,
            path: self.health_endpoint.clone(),
        }
    }

    /// `http://<host>:<port>` at the declared host
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// `http://<host>:<port>` where the prober would reach it
    pub fn resolved_base_url(&self, resolution: &HostResolution) -> String {
        format!(
            "http://{}:{}",
            resolution.hostname(&self.probe_target()),
            self.port
        )
    }
}

/// Liveness of a service as seen by a one-off probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Up,
    Down,
    Unknown,
}

/// Derived status of one registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub name: String,
    pub status: ServiceState,
    pub last_checked: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregated probe results for every registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryHealth {
    pub services: BTreeMap<String, ServiceStatus>,
    pub total_services: usize,
    pub healthy_services: usize,
    pub unhealthy_services: usize,
}

impl RegistryHealth {
    pub fn from_statuses(statuses: Vec<ServiceStatus>) -> Self {
        let total_services = statuses.len();
        let healthy_services = statuses
            .iter()
            .filter(|s| s.status == ServiceState::Up)
            .count();
        let unhealthy_services = statuses
            .iter()
            .filter(|s| s.status == ServiceState::Down)
            .count();

        Self {
            services: statuses.into_iter().map(|s| (s.name.clone(), s)).collect(),
            total_services,
            healthy_services,
            unhealthy_services,
        }
    }
}

/// Public projection of a registration on the gateway surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub service: String,
    pub endpoint: String,
    pub url: String,
    pub version: String,
    pub status: String,
}
