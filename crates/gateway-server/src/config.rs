//! Configuration loading and validation for the gateway server

use crate::telemetry::{OtlpProtocol, TracingSettings};
use crate::types::{AuthPolicy, AuthSettings, ExemptRoute, FailPolicy, ServerConfig};
use healthcheck::types::{HealthCheckConfig, HostResolution};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError};

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewaySettings,

    #[serde(default)]
    pub registry: RegistrySettings,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub metrics: MetricsSettings,

    #[serde(default)]
    pub telemetry: TelemetrySettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        self.gateway.validate()?;
        self.registry.validate()?;
        self.auth.validate()?;
        self.metrics.validate()?;
        self.telemetry.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

/// Gateway (client traffic) settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GatewaySettings {
    #[validate(custom = "validate_listen_addr")]
    pub listen_addr: String,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_forward_timeout")]
    pub forward_timeout: Duration,
}

/// Registry surface and heartbeat settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RegistrySettings {
    #[validate(custom = "validate_listen_addr")]
    pub listen_addr: String,

    /// Shared secret for `x-registry-key`
    pub key: Option<String>,

    pub when_unconfigured: FailPolicy,

    pub trust_forwarded_headers: bool,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_heartbeat_interval")]
    pub heartbeat_interval: Duration,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_probe_timeout")]
    pub probe_timeout: Duration,

    pub resolution: HostResolution,

    #[validate(range(min = 1, max = 100000))]
    pub failure_channel_size: usize,
}

/// Auth gate settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AuthConfig {
    #[validate(length(min = 1), custom = "validate_service_name")]
    pub service_name: String,

    pub when_absent: FailPolicy,

    pub when_unreachable: FailPolicy,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_probe_timeout")]
    pub timeout: Duration,

    pub exempt: Vec<ExemptRoute>,
}

/// Prometheus endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,

    #[validate(custom = "validate_listen_addr")]
    pub listen_addr: String,
}

/// OpenTelemetry export settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TelemetrySettings {
    pub enabled: bool,

    #[validate(length(min = 1))]
    pub service_name: String,

    #[validate(length(min = 1))]
    pub otlp_endpoint: String,

    pub protocol: OtlpProtocol,
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: Option<String>,

    /// `text` or `json`
    #[validate(custom = "validate_log_format")]
    pub format: Option<String>,
}

// Default implementations

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            forward_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3001".to_string(),
            key: None,
            when_unconfigured: FailPolicy::FailClosed,
            trust_forwarded_headers: true,
            heartbeat_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            resolution: HostResolution::Loopback,
            failure_channel_size: 256,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        let settings = AuthSettings::default();
        Self {
            service_name: settings.service_name,
            when_absent: settings.policy.when_absent,
            when_unreachable: settings.policy.when_unreachable,
            timeout: settings.timeout,
            exempt: settings.exempt,
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:9464".to_string(),
        }
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            service_name: "gateway-server".to_string(),
            otlp_endpoint: "http://localhost:4317".to_string(),
            protocol: OtlpProtocol::Grpc,
        }
    }
}

// Custom validators

fn validate_listen_addr(addr: &str) -> Result<(), ValidationError> {
    if addr.trim().parse::<SocketAddr>().is_err() {
        return Err(ValidationError::new("listen_addr_invalid_format"));
    }
    Ok(())
}

fn validate_forward_timeout(timeout: &Duration) -> Result<(), ValidationError> {
    let millis = timeout.as_millis();
    if !(100..=300_000).contains(&millis) {
        return Err(ValidationError::new("forward_timeout_out_of_range"));
    }
    Ok(())
}

fn validate_heartbeat_interval(interval: &Duration) -> Result<(), ValidationError> {
    let millis = interval.as_millis();
    if !(100..=3_600_000).contains(&millis) {
        return Err(ValidationError::new("heartbeat_interval_out_of_range"));
    }
    Ok(())
}

fn validate_probe_timeout(timeout: &Duration) -> Result<(), ValidationError> {
    let millis = timeout.as_millis();
    if !(10..=60_000).contains(&millis) {
        return Err(ValidationError::new("timeout_out_of_range"));
    }
    Ok(())
}

fn validate_service_name(name: &str) -> Result<(), ValidationError> {
    if name.contains('/') || name.chars().any(char::is_whitespace) {
        return Err(ValidationError::new("service_name_invalid_format"));
    }
    Ok(())
}

fn validate_log_format(format: &str) -> Result<(), ValidationError> {
    match format {
        "text" | "json" => Ok(()),
        _ => Err(ValidationError::new("log_format_unknown")),
    }
}

/// Values taken from the command line or the environment. They win over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub gateway_port: Option<u16>,
    pub registry_port: Option<u16>,
    pub registry_key: Option<String>,
    pub heartbeat_interval_ms: Option<u64>,
    pub docker_env: bool,
}

// Configuration loading implementation

impl Config {
    /// Load configuration from default search paths
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load from `explicit` when given, else from the first file found in the
    /// search paths, else defaults.
    pub fn load_from(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(ConfigError::FileNotFound(path.to_path_buf()));
            }
            return Self::load_from_file(path);
        }

        match Self::find_config_file() {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    pub fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/switchboard/gateway.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./gateway.yaml"));

        paths.into_iter().find(|p| p.exists() && p.is_file())
    }

    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/switchboard/gateway.yaml"))
    }

    /// Apply CLI/env overrides, then re-validate.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) -> Result<(), ConfigError> {
        if let Some(port) = overrides.gateway_port {
            self.gateway.listen_addr = with_port(&self.gateway.listen_addr, port);
        }
        if let Some(port) = overrides.registry_port {
            self.registry.listen_addr = with_port(&self.registry.listen_addr, port);
        }
        if let Some(key) = &overrides.registry_key {
            self.registry.key = Some(key.clone());
        }
        if let Some(ms) = overrides.heartbeat_interval_ms {
            self.registry.heartbeat_interval = Duration::from_millis(ms);
        }
        if overrides.docker_env {
            self.registry.resolution = HostResolution::container_dns();
        }

        self.validate()?;
        Ok(())
    }

    /// Convert to the runtime configuration
    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig {
            gateway_addr: self.gateway.listen_addr.clone(),
            registry_addr: self.registry.listen_addr.clone(),
            registry_key: self.registry.key.clone(),
            when_unconfigured: self.registry.when_unconfigured,
            trust_forwarded_headers: self.registry.trust_forwarded_headers,
            heartbeat_interval: self.registry.heartbeat_interval,
            health: HealthCheckConfig {
                timeout: self.registry.probe_timeout,
                resolution: self.registry.resolution.clone(),
            },
            channel_size: self.registry.failure_channel_size,
            forward_timeout: self.gateway.forward_timeout,
            auth: AuthSettings {
                service_name: self.auth.service_name.clone(),
                policy: AuthPolicy {
                    when_absent: self.auth.when_absent,
                    when_unreachable: self.auth.when_unreachable,
                },
                timeout: self.auth.timeout,
                exempt: self.auth.exempt.clone(),
            },
            metrics_enabled: self.metrics.enabled,
            metrics_listen_addr: self.metrics.listen_addr.clone(),
        }
    }

    /// Logging and trace export settings
    pub fn tracing_settings(&self) -> TracingSettings {
        TracingSettings {
            service_name: self.telemetry.service_name.clone(),
            otlp_endpoint: self.telemetry.otlp_endpoint.clone(),
            protocol: self.telemetry.protocol,
            otel_enabled: self.telemetry.enabled,
            log_level: self.logging.level.clone().unwrap_or_else(|| "info".to_string()),
            json: self.logging.format.as_deref() == Some("json"),
        }
    }
}

/// Replace the port of a `host:port` listen address.
fn with_port(addr: &str, port: u16) -> String {
    match addr.parse::<SocketAddr>() {
        Ok(mut socket) => {
            socket.set_port(port);
            socket.to_string()
        }
        Err(_) => match addr.rsplit_once(':') {
            Some((host, _)) => format!("{}:{}", host, port),
            None => format!("{}:{}", addr, port),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_valid_yaml_parsing() {
        let yaml = r#"
gateway:
  listen_addr: "0.0.0.0:8080"
  forward_timeout: 15s

registry:
  listen_addr: "127.0.0.1:8081"
  key: "s3cret"
  heartbeat_interval: 10s
  probe_timeout: 2s
  resolution:
    mode: container_dns
    suffix: "-svc"

auth:
  service_name: auth
  when_unreachable: fail_closed
  exempt:
    - method: GET
      path: "*/status"

logging:
  level: debug
  format: json
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.gateway.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.gateway.forward_timeout, Duration::from_secs(15));
        assert_eq!(config.registry.key.as_deref(), Some("s3cret"));
        assert_eq!(
            config.registry.resolution,
            HostResolution::ContainerDns {
                suffix: "-svc".to_string()
            }
        );
        assert_eq!(config.auth.when_absent, FailPolicy::FailOpen);
        assert_eq!(config.auth.when_unreachable, FailPolicy::FailClosed);
        assert_eq!(config.auth.exempt.len(), 1);
        assert!(config.tracing_settings().json);
    }

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let yaml = r#"
registry:
  key: "abc"
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.registry.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.registry.probe_timeout, Duration::from_secs(5));
        assert_eq!(config.registry.when_unconfigured, FailPolicy::FailClosed);
        assert_eq!(config.gateway.listen_addr, "0.0.0.0:3000");
        assert_eq!(config.auth.exempt, ExemptRoute::defaults());
    }

    #[test]
    fn test_invalid_listen_addr() {
        let yaml = r#"
gateway:
  listen_addr: "not-an-address"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_heartbeat_interval() {
        let yaml = r#"
registry:
  heartbeat_interval: 5ms  # Invalid: < 100ms
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());

        let yaml = r#"
registry:
  heartbeat_interval: 2h  # Invalid: > 1h
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_log_format() {
        let yaml = r#"
logging:
  format: xml
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_auth_service_name() {
        let yaml = r#"
auth:
  service_name: "auth/v1"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(&ConfigOverrides {
                gateway_port: Some(8000),
                registry_port: Some(8001),
                registry_key: Some("from-env".to_string()),
                heartbeat_interval_ms: Some(1500),
                docker_env: true,
            })
            .unwrap();

        assert_eq!(config.gateway.listen_addr, "0.0.0.0:8000");
        assert_eq!(config.registry.listen_addr, "0.0.0.0:8001");
        assert_eq!(config.registry.key.as_deref(), Some("from-env"));
        assert_eq!(config.registry.heartbeat_interval, Duration::from_millis(1500));
        assert_eq!(config.registry.resolution, HostResolution::container_dns());
    }

    #[test]
    fn test_overrides_revalidate() {
        let mut config = Config::default();
        let result = config.apply_overrides(&ConfigOverrides {
            heartbeat_interval_ms: Some(1),
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_config_to_server_config_conversion() {
        let server_config = Config::default().to_server_config();

        assert_eq!(server_config.gateway_addr, "0.0.0.0:3000");
        assert_eq!(server_config.registry_addr, "0.0.0.0:3001");
        assert_eq!(server_config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(server_config.health.timeout, Duration::from_secs(5));
        assert_eq!(server_config.forward_timeout, Duration::from_secs(10));
        assert_eq!(server_config.auth.timeout, Duration::from_secs(5));
        assert_eq!(server_config.auth.service_name, "auth");
        assert!(server_config.registry_key.is_none());
        assert_eq!(server_config.metrics_listen_addr, "127.0.0.1:9464");
    }

    #[test]
    fn test_with_port() {
        assert_eq!(with_port("0.0.0.0:3000", 4000), "0.0.0.0:4000");
        assert_eq!(with_port("[::]:3000", 4000), "[::]:4000");
        assert_eq!(with_port("localhost:3000", 4000), "localhost:4000");
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = Config::load_from(Some(Path::new("/nonexistent/gateway.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }
}
