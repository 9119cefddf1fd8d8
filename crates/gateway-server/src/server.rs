//! Composition root: builds the shared registry and runs both HTTP surfaces.

use crate::access::RegistryGuard;
use crate::auth::AuthGate;
use crate::gateway_api::{self, GatewayState};
use crate::http_server::MetricsServer;
use crate::metrics::MetricsRegistry;
use crate::registry::Registry;
use crate::registry_api::{self, RegistryState};
use crate::router::GatewayRouter;
use crate::store::{InMemoryStore, RegistryStore};
use crate::types::ServerConfig;
use axum::Router;
use healthcheck::checkers::{HealthChecker, HttpChecker};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Everything the two surfaces share, wired together.
pub struct Components {
    pub registry: Arc<Registry>,
    pub gateway: Router,
    pub registry_surface: Router,
    pub metrics: Option<Arc<MetricsRegistry>>,
}

/// Gateway server
pub struct GatewayServer {
    config: ServerConfig,
}

impl GatewayServer {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the store, registry, router, auth gate and both routers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(&self) -> Result<Components, BoxError> {
        let checker: Arc<dyn HealthChecker> = Arc::new(HttpChecker::new(&self.config.health)?);
        self.build_with_checker(checker)
    }

    /// [`build`](Self::build) with a caller-supplied prober.
    pub fn build_with_checker(&self, checker: Arc<dyn HealthChecker>) -> Result<Components, BoxError> {
        let config = &self.config;

        let metrics = if config.metrics_enabled {
            info!("Metrics enabled on {}", config.metrics_listen_addr);
            Some(Arc::new(MetricsRegistry::new()))
        } else {
            info!("Metrics disabled");
            None
        };

        let store: Arc<dyn RegistryStore> = Arc::new(InMemoryStore::new());
        let registry = Registry::new(
            store,
            checker,
            config.heartbeat_interval,
            config.channel_size,
            metrics.clone(),
        );

        let router = Arc::new(GatewayRouter::new(
            registry.clone(),
            config.forward_timeout,
            metrics.clone(),
        )?);
        let gate = Arc::new(AuthGate::new(
            registry.clone(),
            config.auth.clone(),
            config.health.resolution.clone(),
            metrics.clone(),
        )?);
        let guard = Arc::new(RegistryGuard::new(
            config.registry_key.clone(),
            config.when_unconfigured,
            config.trust_forwarded_headers,
            metrics.clone(),
        ));

        let gateway = gateway_api::routes(GatewayState::new(router, registry.clone()), gate);
        let registry_surface = registry_api::routes(
            RegistryState {
                registry: registry.clone(),
            },
            guard,
        );

        Ok(Components {
            registry,
            gateway,
            registry_surface,
            metrics,
        })
    }

    /// Bind the configured addresses and serve until SIGINT or SIGTERM.
    pub async fn run(self) -> Result<(), BoxError> {
        let gateway = TcpListener::bind(&self.config.gateway_addr).await?;
        let registry = TcpListener::bind(&self.config.registry_addr).await?;
        let components = self.build()?;

        self.serve(components, gateway, registry, shutdown_signal())
            .await
    }

    /// Serve both surfaces (and metrics, when enabled) until `shutdown` resolves,
    /// then cancel every heartbeat.
    pub async fn serve(
        &self,
        components: Components,
        gateway_listener: TcpListener,
        registry_listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), BoxError> {
        let Components {
            registry,
            gateway,
            registry_surface,
            metrics,
        } = components;

        let (stop_tx, stop_rx) = watch::channel(false);

        info!(addr = %gateway_listener.local_addr()?, "Gateway listening");
        let gateway_handle = tokio::spawn(
            axum::serve(
                gateway_listener,
                gateway.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(stopped(stop_rx.clone()))
            .into_future(),
        );

        info!(addr = %registry_listener.local_addr()?, "Registry listening");
        let registry_handle = tokio::spawn(
            axum::serve(
                registry_listener,
                registry_surface.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(stopped(stop_rx.clone()))
            .into_future(),
        );

        let metrics_handle = metrics.map(|metrics| {
            let server = MetricsServer::new(metrics, self.config.metrics_listen_addr.clone());
            let stop = stopped(stop_rx.clone());
            tokio::spawn(async move {
                if let Err(e) = server.run(stop).await {
                    warn!(error = %e, "Metrics server error");
                }
            })
        });

        shutdown.await;
        info!("Shutdown requested, draining connections");
        let _ = stop_tx.send(true);

        for (name, handle) in [("gateway", gateway_handle), ("registry", registry_handle)] {
            match handle.await {
                Ok(Ok(())) => info!(surface = name, "Surface stopped"),
                Ok(Err(e)) => warn!(surface = name, error = %e, "Surface stopped with error"),
                Err(e) => warn!(surface = name, error = %e, "Surface task failed"),
            }
        }
        if let Some(handle) = metrics_handle {
            let _ = handle.await;
        }

        registry.shutdown();
        info!("Gateway server stopped");
        Ok(())
    }
}

fn stopped(mut rx: watch::Receiver<bool>) -> impl Future<Output = ()> + Send + 'static {
    async move {
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
