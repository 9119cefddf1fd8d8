//! Logging setup and optional OpenTelemetry trace export.

use common::logging::{env_filter, fmt_layer};
use opentelemetry::{KeyValue, trace::TracerProvider as _};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource, runtime,
    trace::{RandomIdGenerator, Sampler, Tracer, TracerProvider},
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// OTLP transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtlpProtocol {
    /// gRPC via tonic (collector port 4317)
    #[default]
    Grpc,
    /// HTTP protobuf (collector port 4318)
    Http,
}

/// Flushes pending spans and shuts the tracer provider down when dropped.
pub struct TelemetryGuard;

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        opentelemetry::global::shutdown_tracer_provider();
    }
}

/// Tracing settings resolved from configuration
#[derive(Debug, Clone)]
pub struct TracingSettings {
    pub service_name: String,
    pub otlp_endpoint: String,
    pub protocol: OtlpProtocol,
    pub otel_enabled: bool,
    pub log_level: String,
    pub json: bool,
}

/// Build the OTLP tracer and install its provider globally. `None` when disabled.
pub fn init_tracer(
    service_name: &str,
    otlp_endpoint: &str,
    protocol: OtlpProtocol,
    enabled: bool,
) -> Result<Option<Tracer>, Box<dyn std::error::Error>> {
    if !enabled {
        return Ok(None);
    }

    let exporter = match protocol {
        OtlpProtocol::Grpc => opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(otlp_endpoint)
            .build()?,
        OtlpProtocol::Http => opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(otlp_endpoint)
            .build()?,
    };

    let resource = Resource::new(vec![
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION").to_string()),
    ]);

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(resource),
        )
        .build();

    let tracer = provider.tracer("gateway-server");
    opentelemetry::global::set_tracer_provider(provider);

    Ok(Some(tracer))
}

/// Install the global subscriber: env filter, fmt layer (text or JSON) and,
/// when enabled, the OpenTelemetry bridge.
pub async fn setup_tracing(
    settings: &TracingSettings,
) -> Result<Option<TelemetryGuard>, Box<dyn std::error::Error>> {
    let tracer = init_tracer(
        &settings.service_name,
        &settings.otlp_endpoint,
        settings.protocol,
        settings.otel_enabled,
    )?;

    let subscriber = tracing_subscriber::registry()
        .with(fmt_layer(settings.json))
        .with(env_filter(&settings.log_level));

    match tracer {
        Some(tracer) => {
            subscriber
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .try_init()?;
            tracing::info!(
                service_name = %settings.service_name,
                otlp_endpoint = %settings.otlp_endpoint,
                protocol = ?settings.protocol,
                "Tracing initialized with OpenTelemetry export"
            );
            Ok(Some(TelemetryGuard))
        }
        None => {
            subscriber.try_init()?;
            tracing::info!("Tracing initialized without OpenTelemetry");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracer_disabled() {
        let tracer = init_tracer("test-service", "http://localhost:4317", OtlpProtocol::Grpc, false)
            .unwrap();
        assert!(tracer.is_none());
    }

    #[test]
    fn test_protocol_names() {
        let p: OtlpProtocol = serde_json::from_str(r#""http""#).unwrap();
        assert_eq!(p, OtlpProtocol::Http);
        assert_eq!(OtlpProtocol::default(), OtlpProtocol::Grpc);
    }
}
