//! Switchboard gateway server
//!
//! A dynamic service registry paired with a reverse-proxy gateway. Backend
//! services register themselves over the registry surface, are admitted only
//! after a passing health probe and are evicted on the first failed heartbeat.
//! Client traffic on the gateway surface is resolved by `{service, version}`
//! and forwarded verbatim.
//!
//! # Components
//!
//! - **Registry**: admission probe, membership and eviction over a shared
//!   [`RegistryStore`]
//! - **GatewayRouter**: resolves and forwards client calls, evicting services
//!   whose connection fails
//! - **AuthGate**: validates `x-api-key` against the registered auth service
//! - **RegistryGuard**: network-origin and shared-key checks on the registry
//!   surface
//! - **RegistrationClient**: used by backends to join and leave the registry

pub mod access;
pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway_api;
pub mod http_server;
pub mod metrics;
pub mod registry;
pub mod registry_api;
pub mod router;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod types;

pub use access::RegistryGuard;
pub use auth::{AuthDecision, AuthGate};
pub use cli::Cli;
pub use client::{RegistrationClient, RetryPolicy};
pub use config::{Config, ConfigError, ConfigOverrides};
pub use error::ApiError;
pub use http_server::MetricsServer;
pub use metrics::MetricsRegistry;
pub use registry::{Registry, ResolvedService};
pub use router::{GatewayRouter, Payload, ProxyResponse};
pub use server::{Components, GatewayServer, shutdown_signal};
pub use store::{InMemoryStore, RegistryStore};
pub use telemetry::{TelemetryGuard, TracingSettings, setup_tracing};
pub use types::{
    AuthPolicy, AuthSettings, ExemptRoute, FailPolicy, ServerConfig, ServiceRegistration,
};
