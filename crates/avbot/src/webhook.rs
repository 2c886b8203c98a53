//! Webhook endpoint addressing and dispatch to service handlers.

use crate::catalog::ServiceCatalog;
use crate::clients::ClientSet;
use crate::error::{ServiceError, WebhookError};
use crate::service::WebhookRequest;
use axum::http::StatusCode;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tracing::{debug, error, info, warn};

/// Route prefix under which webhook endpoints are served.
pub const HOOKS_PATH: &str = "/services/hooks";

/// Path segment identifying a service in its webhook URL.
pub fn encode_endpoint(service_id: &str) -> String {
    URL_SAFE_NO_PAD.encode(service_id.as_bytes())
}

/// Recover the service ID from an endpoint segment.
pub fn decode_endpoint(segment: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(segment.trim_end_matches('=')).ok()?;
    let service_id = String::from_utf8(bytes).ok()?;
    (!service_id.is_empty()).then_some(service_id)
}

/// Full webhook URL for a service, given the bot's public base URL.
pub fn endpoint_url(base_url: &str, service_id: &str) -> String {
    format!(
        "{}{}/{}",
        base_url.trim_end_matches('/'),
        HOOKS_PATH,
        encode_endpoint(service_id)
    )
}

/// Resolves webhook requests to service instances and runs their handlers.
#[derive(Clone)]
pub struct WebhookDispatcher {
    catalog: ServiceCatalog,
    clients: ClientSet,
}

impl WebhookDispatcher {
    pub fn new(catalog: ServiceCatalog, clients: ClientSet) -> Self {
        Self { catalog, clients }
    }

    pub async fn handle(&self, segment: &str, request: WebhookRequest) -> StatusCode {
        let Some(service_id) = decode_endpoint(segment) else {
            debug!("Webhook endpoint does not decode: {}", segment);
            return StatusCode::NOT_FOUND;
        };

        let service = match self.catalog.load(&service_id).await {
            Ok(Some(service)) => service,
            Ok(None) => {
                debug!(service_id = %service_id, "Webhook for unknown service");
                return StatusCode::NOT_FOUND;
            }
            Err(ServiceError::UnknownServiceType(service_type)) => {
                warn!(
                    service_id = %service_id,
                    service_type = %service_type,
                    "Webhook for service of unregistered type"
                );
                return StatusCode::NOT_FOUND;
            }
            Err(e) => {
                error!(service_id = %service_id, "Failed to load service for webhook: {}", e);
                return StatusCode::INTERNAL_SERVER_ERROR;
            }
        };

        let Some(client) = self.clients.get(service.service_user_id()) else {
            warn!(
                service_id = %service_id,
                user_id = %service.service_user_id(),
                "No chat client for webhook service"
            );
            return StatusCode::NOT_FOUND;
        };

        info!(
            service_id = %service_id,
            service_type = %service.service_type(),
            "Dispatching webhook"
        );

        match service.on_receive_webhook(request, client).await {
            Ok(()) => StatusCode::OK,
            Err(WebhookError::Decode(e)) => {
                warn!(service_id = %service_id, "Rejected webhook payload: {}", e);
                StatusCode::BAD_REQUEST
            }
            Err(WebhookError::Unauthorized) => {
                warn!(service_id = %service_id, "Webhook signature mismatch");
                StatusCode::UNAUTHORIZED
            }
            Err(WebhookError::Unsupported) => StatusCode::NOT_FOUND,
        }
    }
}
