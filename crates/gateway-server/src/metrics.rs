//! Prometheus metrics for the gateway and the registry.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::time::Duration;

/// Labels for probe results
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ProbeLabels {
    /// healthy, unhealthy, timeout, refused, error
    pub result: String,
}

/// Labels for registration attempts
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RegistrationLabels {
    /// accepted, rejected
    pub outcome: String,
}

/// Labels for removals
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DeregistrationLabels {
    /// explicit, heartbeat, route_failure
    pub reason: String,
}

/// Labels for proxied requests
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ProxyLabels {
    pub service: String,
    /// ok, not_registered, unavailable, upstream_error
    pub outcome: String,
}

/// Labels for proxy latency
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ServiceLabels {
    pub service: String,
}

/// Labels for auth gate decisions
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct AuthLabels {
    /// allowed, rejected, fail_open_absent, fail_open_degraded, exempt
    pub decision: String,
}

/// Labels for registry access denials
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct AccessLabels {
    /// forbidden, unauthorized, misconfigured
    pub reason: String,
}

/// Metrics registry with every gateway metric
pub struct MetricsRegistry {
    /// Prometheus registry
    pub registry: Registry,

    probes_total: Family<ProbeLabels, Counter>,
    probe_duration_seconds: Histogram,
    registrations_total: Family<RegistrationLabels, Counter>,
    deregistrations_total: Family<DeregistrationLabels, Counter>,
    registered_services: Gauge,
    heartbeats_active: Gauge,
    proxy_requests_total: Family<ProxyLabels, Counter>,
    proxy_duration_seconds: Family<ServiceLabels, Histogram>,
    auth_decisions_total: Family<AuthLabels, Counter>,
    access_denials_total: Family<AccessLabels, Counter>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("switchboard");

        let probes_total = Family::<ProbeLabels, Counter>::default();
        registry.register(
            "probes",
            "Health probes performed, by result",
            probes_total.clone(),
        );

        // 1ms to ~8s
        let probe_duration_seconds = Histogram::new(exponential_buckets(0.001, 2.0, 14));
        registry.register(
            "probe_duration_seconds",
            "Health probe duration in seconds",
            probe_duration_seconds.clone(),
        );

        let registrations_total = Family::<RegistrationLabels, Counter>::default();
        registry.register(
            "registrations",
            "Registration attempts, by outcome",
            registrations_total.clone(),
        );

        let deregistrations_total = Family::<DeregistrationLabels, Counter>::default();
        registry.register(
            "deregistrations",
            "Registrations removed, by reason",
            deregistrations_total.clone(),
        );

        let registered_services = Gauge::default();
        registry.register(
            "registered_services",
            "Number of registered services",
            registered_services.clone(),
        );

        let heartbeats_active = Gauge::default();
        registry.register(
            "heartbeats_active",
            "Number of armed heartbeats",
            heartbeats_active.clone(),
        );

        let proxy_requests_total = Family::<ProxyLabels, Counter>::default();
        registry.register(
            "proxy_requests",
            "Requests routed through the gateway, by service and outcome",
            proxy_requests_total.clone(),
        );

        let proxy_duration_seconds =
            Family::<ServiceLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "proxy_duration_seconds",
            "Forwarded request duration in seconds",
            proxy_duration_seconds.clone(),
        );

        let auth_decisions_total = Family::<AuthLabels, Counter>::default();
        registry.register(
            "auth_decisions",
            "Auth gate decisions",
            auth_decisions_total.clone(),
        );

        let access_denials_total = Family::<AccessLabels, Counter>::default();
        registry.register(
            "registry_access_denials",
            "Registry requests denied, by reason",
            access_denials_total.clone(),
        );

        Self {
            registry,
            probes_total,
            probe_duration_seconds,
            registrations_total,
            deregistrations_total,
            registered_services,
            heartbeats_active,
            proxy_requests_total,
            proxy_duration_seconds,
            auth_decisions_total,
            access_denials_total,
        }
    }

    /// Record a probe result
    pub fn record_probe(&self, result: &str, duration: Duration) {
        self.probes_total
            .get_or_create(&ProbeLabels {
                result: result.to_string(),
            })
            .inc();
        self.probe_duration_seconds.observe(duration.as_secs_f64());
    }

    pub fn record_registration(&self, outcome: &str) {
        self.registrations_total
            .get_or_create(&RegistrationLabels {
                outcome: outcome.to_string(),
            })
            .inc();
    }

    pub fn record_deregistration(&self, reason: &str) {
        self.deregistrations_total
            .get_or_create(&DeregistrationLabels {
                reason: reason.to_string(),
            })
            .inc();
    }

    /// Update the registered-service and armed-heartbeat gauges
    pub fn update_membership(&self, registered: usize, heartbeats: usize) {
        self.registered_services.set(registered as i64);
        self.heartbeats_active.set(heartbeats as i64);
    }

    /// Record a routed request
    pub fn record_proxy(&self, service: &str, outcome: &str, duration: Duration) {
        self.proxy_requests_total
            .get_or_create(&ProxyLabels {
                service: service.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
        self.proxy_duration_seconds
            .get_or_create(&ServiceLabels {
                service: service.to_string(),
            })
            .observe(duration.as_secs_f64());
    }

    pub fn record_auth_decision(&self, decision: &str) {
        self.auth_decisions_total
            .get_or_create(&AuthLabels {
                decision: decision.to_string(),
            })
            .inc();
    }

    pub fn record_access_denial(&self, reason: &str) {
        self.access_denials_total
            .get_or_create(&AccessLabels {
                reason: reason.to_string(),
            })
            .inc();
    }

    /// Encode every metric in Prometheus text format
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registry_creation() {
        let registry = MetricsRegistry::new();
        let text = registry.encode().unwrap();
        assert!(text.contains("switchboard_registered_services"));
    }

    #[test]
    fn test_record_probe_and_registration() {
        let registry = MetricsRegistry::new();

        registry.record_probe("healthy", Duration::from_millis(5));
        registry.record_probe("refused", Duration::from_millis(1));
        registry.record_registration("accepted");
        registry.record_registration("rejected");

        let text = registry.encode().unwrap();
        assert!(text.contains(r#"switchboard_probes_total{result="refused"} 1"#));
        assert!(text.contains(r#"switchboard_registrations_total{outcome="accepted"} 1"#));
    }

    #[test]
    fn test_membership_gauges() {
        let registry = MetricsRegistry::new();
        registry.update_membership(3, 3);
        registry.update_membership(2, 2);

        let text = registry.encode().unwrap();
        assert!(text.contains("switchboard_registered_services 2"));
        assert!(text.contains("switchboard_heartbeats_active 2"));
    }

    #[test]
    fn test_deregistration_reasons() {
        let registry = MetricsRegistry::new();
        registry.record_deregistration("explicit");
        registry.record_deregistration("heartbeat");
        registry.record_deregistration("heartbeat");

        let text = registry.encode().unwrap();
        assert!(text.contains(r#"switchboard_deregistrations_total{reason="heartbeat"} 2"#));
    }

    #[test]
    fn test_proxy_and_auth() {
        let registry = MetricsRegistry::new();
        registry.record_proxy("posts", "ok", Duration::from_millis(12));
        registry.record_auth_decision("fail_open_degraded");
        registry.record_access_denial("forbidden");

        let text = registry.encode().unwrap();
        assert!(text.contains(r#"service="posts""#));
        assert!(text.contains(r#"decision="fail_open_degraded""#));
        assert!(text.contains(r#"reason="forbidden""#));
    }
}
