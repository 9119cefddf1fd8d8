//! Logging utilities for Switchboard components.

use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// Build the env filter, preferring RUST_LOG over the configured level.
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Build the stdout formatting layer, JSON when `json` is set.
pub fn fmt_layer(json: bool) -> Box<dyn Layer<Registry> + Send + Sync> {
    if json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().boxed()
    }
}
