//! Switchboard gateway binary

use clap::Parser;
use gateway_server::{Cli, Config, GatewayServer, setup_tracing};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Tracing is not initialized yet, so configuration errors go to stderr
    let mut config = match Config::load_from(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) if cli.config.is_some() => {
            eprintln!("Configuration error: {}", e);
            return Err(e.into());
        }
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            eprintln!("Using default configuration");
            Config::default()
        }
    };

    if let Err(e) = config.apply_overrides(&cli.overrides()) {
        eprintln!("Invalid override: {}", e);
        return Err(e.into());
    }

    let _telemetry_guard = setup_tracing(&config.tracing_settings()).await?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Switchboard gateway starting");

    let server_config = config.to_server_config();
    if server_config.registry_key.is_none() {
        tracing::warn!(
            policy = ?server_config.when_unconfigured,
            "No registry key configured"
        );
    }

    if let Err(e) = GatewayServer::new(server_config).run().await {
        tracing::error!(error = %e, "Gateway server failed");
        return Err(e as Box<dyn std::error::Error>);
    }

    // Telemetry guard flushes spans on drop
    Ok(())
}
