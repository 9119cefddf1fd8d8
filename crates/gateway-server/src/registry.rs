//! Registration protocol: admission probe, membership and eviction.
//!
//! The store and the heartbeat arena are only ever changed together, under
//! one membership lock:
//! - register: store write, then arm
//! - deregister / evict: disarm, then delete
//!
//! Heartbeat failures arrive on the monitor's channel and are handled by a
//! worker task that evicts only when the failure's generation is still the
//! armed one, so a service is evicted at most once per registration.

use crate::metrics::MetricsRegistry;
use crate::store::RegistryStore;
use crate::types::{RegistryHealth, ServiceRegistration, ServiceState, ServiceStatus};
use chrono::Utc;
use common::{Error, Result};
use futures::future::join_all;
use healthcheck::checkers::HealthChecker;
use healthcheck::monitor::{HeartbeatFailure, HeartbeatMonitor};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};
use validator::Validate;

/// Message prefix of a rejection caused by the admission probe.
pub const HEALTH_CHECK_FAILED: &str = "Service health check failed";

/// A registration and the heartbeat generation it was armed under.
///
/// `generation` is `None` once the monitor has been shut down.
#[derive(Debug, Clone)]
pub struct ResolvedService {
    pub registration: ServiceRegistration,
    pub generation: Option<u64>,
}

/// Service registry
pub struct Registry {
    store: Arc<dyn RegistryStore>,
    checker: Arc<dyn HealthChecker>,
    monitor: HeartbeatMonitor,
    membership: Mutex<()>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl Registry {
    /// Create a registry and spawn its eviction worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        store: Arc<dyn RegistryStore>,
        checker: Arc<dyn HealthChecker>,
        heartbeat_interval: Duration,
        channel_size: usize,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> Arc<Self> {
        let (monitor, failures) =
            HeartbeatMonitor::new(checker.clone(), heartbeat_interval, channel_size);

        let registry = Arc::new(Self {
            store,
            checker,
            monitor,
            membership: Mutex::new(()),
            metrics,
        });

        tokio::spawn(eviction_worker(Arc::downgrade(&registry), failures));

        registry
    }

    /// Admit a registration after a successful health probe.
    pub async fn register(&self, registration: ServiceRegistration) -> Result<ServiceRegistration> {
        if let Err(e) = registration.validate() {
            self.record_registration("rejected");
            return Err(Error::validation(format!("Invalid registration: {}", e)));
        }

        let result = self.checker.check(&registration.probe_target()).await;
        if let Some(ref m) = self.metrics {
            m.record_probe(&result.status.to_string().to_lowercase(), result.duration);
        }

        if let Some(cause) = result.cause() {
            warn!(
                service = %registration.name,
                port = registration.port,
                cause = %cause,
                "Registration rejected: health check failed"
            );
            self.record_registration("rejected");
            return Err(Error::validation(format!("{}: {}", HEALTH_CHECK_FAILED, cause)));
        }

        let mut registration = registration;
        registration.timestamp.get_or_insert_with(Utc::now);

        let generation = {
            let _guard = self.membership.lock().await;
            self.store.set(&registration.name, registration.clone());
            let generation = self
                .monitor
                .arm(&registration.name, registration.probe_target());
            self.update_gauges();
            generation
        };

        self.record_registration("accepted");
        info!(
            service = %registration.name,
            host = %registration.host,
            port = registration.port,
            version = %registration.version,
            generation,
            "Service registered"
        );

        Ok(registration)
    }

    /// Remove a registration and its heartbeat. Returns whether it existed.
    pub async fn deregister(&self, name: &str) -> bool {
        let removed = {
            let _guard = self.membership.lock().await;
            self.monitor.disarm(name);
            let removed = self.store.delete(name);
            self.update_gauges();
            removed
        };

        if removed {
            self.record_deregistration("explicit");
            info!(service = name, "Service deregistered");
        } else {
            debug!(service = name, "Deregistration of unknown service");
        }

        removed
    }

    /// Remove `name` only if it is still armed under `generation`.
    ///
    /// A failure observed against an old registration must not evict a
    /// newer one registered under the same name.
    pub async fn evict_if_current(&self, name: &str, generation: u64) -> bool {
        let evicted = self.evict_generation(name, generation).await;

        if evicted {
            self.record_deregistration("route_failure");
            warn!(service = name, generation, "Service evicted after routing failure");
        }

        evicted
    }

    /// Look up `name` together with the heartbeat generation it is armed under.
    pub fn resolve(&self, name: &str) -> Option<ResolvedService> {
        // Generation first: a store read that follows it is never older.
        let generation = self.monitor.generation(name);
        self.store.get(name).map(|registration| ResolvedService {
            registration,
            generation,
        })
    }

    pub fn get(&self, name: &str) -> Option<ServiceRegistration> {
        self.store.get(name)
    }

    /// Every registration, sorted by name
    pub fn list(&self) -> Vec<ServiceRegistration> {
        self.store.list()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Whether a heartbeat is armed for `name`
    pub fn is_monitored(&self, name: &str) -> bool {
        self.monitor.is_armed(name)
    }

    /// Number of armed heartbeats
    pub fn heartbeat_count(&self) -> usize {
        self.monitor.len()
    }

    /// Probe every registration in parallel. Never evicts.
    pub async fn registry_health(&self) -> RegistryHealth {
        let services = self.store.list();

        let probes = services.iter().map(|service| async move {
            let result = self.checker.check(&service.probe_target()).await;
            if let Some(ref m) = self.metrics {
                m.record_probe(&result.status.to_string().to_lowercase(), result.duration);
            }

            let last_checked = Utc::now();
            match result.cause() {
                None => ServiceStatus {
                    name: service.name.clone(),
                    status: ServiceState::Up,
                    last_checked,
                    response_time: Some(result.duration.as_millis() as u64),
                    error: None,
                },
                Some(cause) => ServiceStatus {
                    name: service.name.clone(),
                    status: ServiceState::Down,
                    last_checked,
                    response_time: None,
                    error: Some(cause),
                },
            }
        });

        RegistryHealth::from_statuses(join_all(probes).await)
    }

    /// Cancel every heartbeat. Registrations stay in the store.
    pub fn shutdown(&self) {
        self.monitor.shutdown();
        self.update_gauges();
    }

    async fn evict_generation(&self, name: &str, generation: u64) -> bool {
        let _guard = self.membership.lock().await;
        if self.monitor.disarm_if(name, generation) {
            self.store.delete(name);
            self.update_gauges();
            true
        } else {
            false
        }
    }

    async fn handle_heartbeat_failure(&self, failure: HeartbeatFailure) {
        let evicted = self.evict_generation(&failure.name, failure.generation).await;

        if evicted {
            self.record_deregistration("heartbeat");
            let cause = failure.result.cause().unwrap_or_default();
            warn!(
                service = %failure.name,
                generation = failure.generation,
                cause = %cause,
                "Service evicted after failed heartbeat"
            );
        } else {
            debug!(
                service = %failure.name,
                generation = failure.generation,
                "Ignoring stale heartbeat failure"
            );
        }
    }

    fn update_gauges(&self) {
        if let Some(ref m) = self.metrics {
            m.update_membership(self.store.len(), self.monitor.len());
        }
    }

    fn record_registration(&self, outcome: &str) {
        if let Some(ref m) = self.metrics {
            m.record_registration(outcome);
        }
    }

    fn record_deregistration(&self, reason: &str) {
        if let Some(ref m) = self.metrics {
            m.record_deregistration(reason);
        }
    }
}

async fn eviction_worker(registry: Weak<Registry>, mut failures: mpsc::Receiver<HeartbeatFailure>) {
    debug!("Eviction worker started");

    while let Some(failure) = failures.recv().await {
        let Some(registry) = registry.upgrade() else {
            break;
        };
        registry.handle_heartbeat_failure(failure).await;
    }

    debug!("Eviction worker stopped");
}
