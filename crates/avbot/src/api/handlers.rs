//! HTTP request handlers.

use super::error::ApiError;
use super::types::{
    ConfigureServiceRequest, ConfigureServiceResponse, GetServiceResponse, ServiceIdRequest,
};
use super::AppState;
use crate::lifecycle::ConfigureRequest;
use crate::service::WebhookRequest;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde_json::{json, Value};
use tracing::info;

/// Liveness check.
pub async fn heartbeat() -> Json<Value> {
    Json(json!({}))
}

/// Inbound third-party webhook.
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(endpoint): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    state
        .webhooks
        .handle(&endpoint, WebhookRequest::new(body, headers))
        .await
}

pub async fn configure_service(
    State(state): State<AppState>,
    Json(request): Json<ConfigureServiceRequest>,
) -> Result<Json<ConfigureServiceResponse>, ApiError> {
    info!(service_id = %request.id, service_type = %request.service_type, "Configure service request");

    let outcome = state
        .lifecycle
        .configure(ConfigureRequest {
            service_type: request.service_type,
            service_id: request.id,
            service_user_id: request.user_id,
            config: request.config,
        })
        .await?;

    Ok(Json(ConfigureServiceResponse {
        id: outcome.service_id,
        service_type: outcome.service_type,
        old_config: outcome.old_config,
        new_config: outcome.new_config,
    }))
}

pub async fn get_service(
    State(state): State<AppState>,
    Json(request): Json<ServiceIdRequest>,
) -> Result<Json<GetServiceResponse>, ApiError> {
    let record = state
        .lifecycle
        .catalog()
        .store()
        .load(&request.id)
        .await
        .map_err(crate::error::ServiceError::from)?
        .ok_or_else(|| ApiError::NotFound(request.id.clone()))?;

    Ok(Json(GetServiceResponse {
        id: record.service_id,
        service_type: record.service_type,
        config: record.config,
    }))
}

pub async fn remove_service(
    State(state): State<AppState>,
    Json(request): Json<ServiceIdRequest>,
) -> Result<Json<Value>, ApiError> {
    info!(service_id = %request.id, "Remove service request");
    state.lifecycle.remove(&request.id).await?;
    Ok(Json(json!({})))
}
