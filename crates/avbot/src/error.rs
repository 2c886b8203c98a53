//! Error types shared by the routing and lifecycle core.

use matrix_client::MatrixError;
use service_store::StoreError;
use thiserror::Error;

/// Errors raised while configuring, loading or removing services.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Unknown service type: {0}")]
    UnknownServiceType(String),

    #[error("Unknown matrix client: {0}")]
    UnknownClient(String),

    #[error("Service {service_id} has type {existing}, cannot change it to {requested}")]
    TypeMismatch {
        service_id: String,
        existing: String,
        requested: String,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Register failed: {0}")]
    RegisterFailed(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),
}

/// Startup errors from building the service registry.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Service type must not be empty")]
    EmptyType,

    #[error("Service type already registered: {0}")]
    Duplicate(String),
}

/// Failure inside a command handler. Rendered as a chat notice.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("{0}")]
    Upstream(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Matrix error: {0}")]
    Matrix(#[from] MatrixError),
}

/// Outcome of a webhook handler that is not a plain success.
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Invalid webhook payload: {0}")]
    Decode(String),

    #[error("Webhook signature mismatch")]
    Unauthorized,

    #[error("Service does not accept webhooks")]
    Unsupported,
}

/// Top-level application error.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    #[error("Matrix error: {0}")]
    Matrix(#[from] MatrixError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for application errors.
pub type AppResult<T> = Result<T, AppError>;
