//! HTTP surface: webhook endpoints and the admin API.

mod error;
mod handlers;
mod middleware;
mod types;

pub use error::{ApiError, ErrorResponse};
pub use handlers::*;
pub use middleware::logging_middleware;
pub use types::*;

use crate::lifecycle::LifecycleManager;
use crate::webhook::WebhookDispatcher;
use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<LifecycleManager>,
    pub webhooks: WebhookDispatcher,
}

impl AppState {
    pub fn new(lifecycle: Arc<LifecycleManager>, webhooks: WebhookDispatcher) -> Self {
        Self {
            lifecycle,
            webhooks,
        }
    }
}

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/test", get(handlers::heartbeat))
        .route("/services/hooks/:endpoint", post(handlers::receive_webhook))
        .route("/admin/configureService", post(handlers::configure_service))
        .route("/admin/getService", post(handlers::get_service))
        .route("/admin/removeService", post(handlers::remove_service))
        .layer(axum_middleware::from_fn(logging_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
