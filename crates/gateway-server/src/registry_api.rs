//! Registry HTTP surface. Every route sits behind the registry guard.

use crate::access::{RegistryGuard, registry_guard};
use crate::error::{ApiError, now_rfc3339};
use crate::registry::Registry;
use crate::types::ServiceRegistration;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{delete, get, post},
};
use common::Error;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state of the registry surface
#[derive(Clone)]
pub struct RegistryState {
    pub registry: Arc<Registry>,
}

/// Build the registry router.
pub fn routes(state: RegistryState, guard: Arc<RegistryGuard>) -> Router {
    Router::new()
        .route("/registry/register", post(register))
        .route("/registry/services", get(list_services))
        .route(
            "/registry/services/:name",
            get(get_service).delete(deregister),
        )
        .route("/registry/health", get(health))
        .route("/registry/ping", get(ping))
        .layer(middleware::from_fn_with_state(guard, registry_guard))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn register(
    State(state): State<RegistryState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let registration: ServiceRegistration = serde_json::from_slice(&body)
        .map_err(|e| Error::validation(format!("Invalid registration payload: {}", e)))?;

    info!(service = %registration.name, "Registration request");
    let stored = state.registry.register(registration).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": format!("Service {} registered successfully", stored.name),
            "data": {
                "name": stored.name,
                "port": stored.port,
                "version": stored.version,
                "registeredAt": now_rfc3339(),
            },
        })),
    ))
}

async fn deregister(State(state): State<RegistryState>, Path(name): Path<String>) -> Json<Value> {
    info!(service = %name, "Deregistration request");
    let removed = state.registry.deregister(&name).await;

    let message = if removed {
        format!("Service {} deregistered successfully", name)
    } else {
        format!("Service {} was not found", name)
    };

    Json(json!({
        "success": removed,
        "message": message,
        "data": {
            "serviceName": name,
            "deregisteredAt": now_rfc3339(),
        },
    }))
}

async fn list_services(State(state): State<RegistryState>) -> Json<Value> {
    let services = state.registry.list();
    Json(json!({
        "success": true,
        "data": {
            "count": services.len(),
            "services": services,
            "timestamp": now_rfc3339(),
        },
    }))
}

async fn get_service(
    State(state): State<RegistryState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let service = state
        .registry
        .get(&name)
        .ok_or_else(|| Error::not_registered(&name))?;

    Ok(Json(json!({ "success": true, "data": service })))
}

async fn health(State(state): State<RegistryState>) -> Json<Value> {
    let health = state.registry.registry_health().await;
    Json(json!({ "success": true, "data": health }))
}

async fn ping() -> Json<Value> {
    Json(json!({
        "success": true,
        "message": "Registry service is running",
        "timestamp": now_rfc3339(),
    }))
}
