//! Health check types and structures.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Health check status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Service answered with a 2xx status
    Healthy,
    /// Service answered with a non-2xx status
    Unhealthy,
    /// Health check timed out
    Timeout,
    /// Connection was refused
    Refused,
    /// Any other transport failure
    Error,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "HEALTHY"),
            HealthStatus::Unhealthy => write!(f, "UNHEALTHY"),
            HealthStatus::Timeout => write!(f, "TIMEOUT"),
            HealthStatus::Refused => write!(f, "REFUSED"),
            HealthStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Health check result
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    /// Status of the health check
    pub status: HealthStatus,

    /// Duration of the health check
    pub duration: Duration,

    /// Optional error message
    pub message: Option<String>,

    /// Response code (when the service answered)
    pub response_code: Option<u16>,
}

impl HealthCheckResult {
    /// Create a healthy result
    pub fn healthy(duration: Duration, response_code: u16) -> Self {
        Self {
            status: HealthStatus::Healthy,
            duration,
            message: None,
            response_code: Some(response_code),
        }
    }

    /// Create an unhealthy result for a non-2xx answer
    pub fn unhealthy(duration: Duration, response_code: u16) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            duration,
            message: Some(format!("Health check returned status {}", response_code)),
            response_code: Some(response_code),
        }
    }

    /// Create a timeout result
    pub fn timeout(duration: Duration) -> Self {
        Self {
            status: HealthStatus::Timeout,
            duration,
            message: Some("Health check timed out".to_string()),
            response_code: None,
        }
    }

    /// Create a connection-refused result
    pub fn refused(duration: Duration, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Refused,
            duration,
            message: Some(message.into()),
            response_code: None,
        }
    }

    /// Create an error result
    pub fn error(duration: Duration, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Error,
            duration,
            message: Some(message.into()),
            response_code: None,
        }
    }

    /// Check if the result is healthy
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// Human readable failure cause, `None` when healthy
    pub fn cause(&self) -> Option<String> {
        if self.is_healthy() {
            return None;
        }
        Some(
            self.message
                .clone()
                .unwrap_or_else(|| self.status.to_string()),
        )
    }
}

/// What a probe should hit: the service's name, its declared location and
/// its health path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub service: String,
    pub host: String,
    pub port: u16,
    pub path: String,
}

/// How the prober turns a registration into a hostname.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum HostResolution {
    /// Local development: everything lives on the loopback interface
    #[default]
    Loopback,

    /// Containerized deployment: `<service><suffix>` resolves via container DNS
    ContainerDns {
        #[serde(default = "default_container_suffix")]
        suffix: String,
    },

    /// Use the host the service declared at registration
    Declared,
}

fn default_container_suffix() -> String {
    "-service".to_string()
}

impl HostResolution {
    /// Container DNS with the default `-service` suffix
    pub fn container_dns() -> Self {
        HostResolution::ContainerDns {
            suffix: default_container_suffix(),
        }
    }

    /// Resolve the hostname to probe for a target
    pub fn hostname(&self, target: &ProbeTarget) -> String {
        match self {
            HostResolution::Loopback => "127.0.0.1".to_string(),
            HostResolution::ContainerDns { suffix } => format!("{}{}", target.service, suffix),
            HostResolution::Declared => target.host.clone(),
        }
    }
}

/// Health check configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Timeout for a single probe
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Hostname resolution rule
    #[serde(default)]
    pub resolution: HostResolution,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            resolution: HostResolution::Loopback,
        }
    }
}
