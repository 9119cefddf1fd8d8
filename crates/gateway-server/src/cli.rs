//! Command line and environment overrides.

use crate::config::ConfigOverrides;
use clap::Parser;
use std::path::PathBuf;

/// Switchboard gateway: service registry and reverse proxy
#[derive(Debug, Parser)]
#[command(name = "gateway-server", version, about)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Gateway listen port
    #[arg(long, env = "GATEWAY_PORT")]
    pub gateway_port: Option<u16>,

    /// Registry listen port
    #[arg(long, env = "REGISTRY_PORT")]
    pub registry_port: Option<u16>,

    /// Shared secret required in `x-registry-key`
    #[arg(long, env = "REG_KEY", hide_env_values = true)]
    pub registry_key: Option<String>,

    /// Heartbeat interval in milliseconds
    #[arg(long, env = "HEARTBEAT_INTERVAL_MS")]
    pub heartbeat_interval_ms: Option<u64>,

    /// Resolve services by container DNS name instead of loopback
    #[arg(long, env = "DOCKER_ENV")]
    pub docker_env: bool,
}

impl Cli {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            gateway_port: self.gateway_port,
            registry_port: self.registry_port,
            registry_key: self.registry_key.clone(),
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            docker_env: self.docker_env,
        }
    }
}
