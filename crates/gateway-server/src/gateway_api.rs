//! Gateway HTTP surface: liveness, health views, service listing and the
//! proxy routes.

use crate::auth::{AuthGate, auth_gate};
use crate::error::{ApiError, now_rfc3339};
use crate::registry::Registry;
use crate::router::{GatewayRouter, Payload};
use crate::types::ServiceState;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{HeaderMap, Method, StatusCode, header::CONTENT_TYPE},
    middleware,
    response::{IntoResponse, Response},
    routing::{any, get},
};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Shared state of the gateway surface
#[derive(Clone)]
pub struct GatewayState {
    pub router: Arc<GatewayRouter>,
    pub registry: Arc<Registry>,
    pub started_at: Instant,
}

impl GatewayState {
    pub fn new(router: Arc<GatewayRouter>, registry: Arc<Registry>) -> Self {
        Self {
            router,
            registry,
            started_at: Instant::now(),
        }
    }
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    status: &'static str,
    message: &'static str,
    timestamp: String,
    uptime: String,
}

/// Build the gateway router, with the auth gate in front of every route.
pub fn routes(state: GatewayState, gate: Arc<AuthGate>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ping", get(ping))
        .route("/health/registry", get(registry_health))
        .route("/health/services", get(services_health))
        .route("/health/detailed", get(detailed_health))
        .route("/services", get(services))
        .route("/:service/:version", any(proxy))
        .route("/:service/:version/*path", any(proxy_with_path))
        .layer(middleware::from_fn_with_state(gate, auth_gate))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn health(State(state): State<GatewayState>) -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "ok",
        message: "Gateway is healthy",
        timestamp: now_rfc3339(),
        uptime: format_uptime(state.started_at.elapsed()),
    })
}

async fn ping(State(state): State<GatewayState>) -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "ok",
        message: "Gateway is alive",
        timestamp: now_rfc3339(),
        uptime: format_uptime(state.started_at.elapsed()),
    })
}

async fn services(State(state): State<GatewayState>) -> Json<Value> {
    Json(json!({ "services": state.router.service_endpoints() }))
}

/// Probe every registration and report the aggregate. Never evicts.
async fn registry_health(State(state): State<GatewayState>) -> Json<Value> {
    let health = state.registry.registry_health().await;
    Json(json!({
        "status": "ok",
        "data": health,
        "timestamp": now_rfc3339(),
    }))
}

/// Per-service probe results with a healthy/unhealthy summary.
async fn services_health(State(state): State<GatewayState>) -> Json<Value> {
    let health = state.registry.registry_health().await;
    let ports: BTreeMap<String, u16> = state
        .registry
        .list()
        .into_iter()
        .map(|r| (r.name, r.port))
        .collect();

    let services: Vec<Value> = health
        .services
        .values()
        .map(|s| {
            let status = if s.status == ServiceState::Up {
                "healthy"
            } else {
                "unhealthy"
            };
            let mut entry = json!({
                "name": s.name,
                "status": status,
                "port": ports.get(&s.name),
                "lastChecked": s.last_checked,
            });
            if let Some(ms) = s.response_time {
                entry["responseTime"] = json!(ms);
            }
            if let Some(ref error) = s.error {
                entry["error"] = json!(error);
            }
            entry
        })
        .collect();

    let status = if health.unhealthy_services == 0 {
        "ok"
    } else {
        "degraded"
    };
    Json(json!({
        "status": status,
        "data": {
            "services": services,
            "summary": {
                "total": health.total_services,
                "healthy": health.healthy_services,
                "unhealthy": health.unhealthy_services,
            },
        },
        "timestamp": now_rfc3339(),
    }))
}

/// Component view built from registry state only; no probes are issued.
async fn detailed_health(State(state): State<GatewayState>) -> Json<Value> {
    let timestamp = now_rfc3339();
    let registrations = state.registry.list();

    let mut components = Map::new();
    components.insert(
        "gateway".to_string(),
        json!({
            "status": "up",
            "timestamp": timestamp,
            "uptime": format_uptime(state.started_at.elapsed()),
            "message": "Gateway is running and accessible",
        }),
    );
    components.insert(
        "registry".to_string(),
        json!({
            "status": "up",
            "timestamp": timestamp,
            "registered_services": registrations.len(),
            "monitored_services": state.registry.heartbeat_count(),
        }),
    );
    for registration in registrations {
        components.insert(
            format!("service_{}", registration.name),
            json!({
                "status": "registered",
                "port": registration.port,
                "version": registration.version,
                "monitored": state.registry.is_monitored(&registration.name),
                "lastRegistered": registration.timestamp,
            }),
        );
    }

    let components = Value::Object(components);
    Json(json!({
        "status": "ok",
        "info": components,
        "error": {},
        "details": components,
    }))
}

async fn proxy(
    State(state): State<GatewayState>,
    Path((service, version)): Path<(String, String)>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    forward(&state, method, &service, &version, "", query, &headers, body).await
}

async fn proxy_with_path(
    State(state): State<GatewayState>,
    Path((service, version, path)): Path<(String, String, String)>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    forward(&state, method, &service, &version, &path, query, &headers, body).await
}

#[allow(clippy::too_many_arguments)]
async fn forward(
    state: &GatewayState,
    method: Method,
    service: &str,
    version: &str,
    path: &str,
    query: Option<String>,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let payload = Payload {
        content_type: headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        body,
    };

    let answer = state
        .router
        .route_request(method, service, version, path, query.as_deref(), payload)
        .await?;

    let status = StatusCode::from_u16(answer.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = (status, answer.body).into_response();
    *response.headers_mut() = answer.headers;

    Ok(response)
}

/// Human readable uptime, at most three units: "3s", "45m 35s", "3h 30m 2s",
/// "1d 4h 2m". Seconds are dropped once days are shown.
pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    let mut parts = Vec::with_capacity(3);
    if days > 0 {
        parts.push(format!("{}d", days));
        if hours > 0 {
            parts.push(format!("{}h", hours));
        }
        if minutes > 0 {
            parts.push(format!("{}m", minutes));
        }
    } else if hours > 0 {
        parts.push(format!("{}h", hours));
        if minutes > 0 {
            parts.push(format!("{}m", minutes));
        }
        if seconds > 0 {
            parts.push(format!("{}s", seconds));
        }
    } else if minutes > 0 {
        parts.push(format!("{}m", minutes));
        if seconds > 0 {
            parts.push(format!("{}s", seconds));
        }
    } else {
        parts.push(format!("{}s", seconds));
    }

    parts.join(" ")
}
