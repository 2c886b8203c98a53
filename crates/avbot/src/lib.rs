//! Matrix bot framework: pluggable services answer chat commands and
//! third-party webhooks, configured at runtime through an admin API.

pub mod api;
pub mod bot;
pub mod catalog;
pub mod clients;
pub mod config;
pub mod error;
pub mod format;
pub mod lifecycle;
pub mod matching;
pub mod registry;
pub mod router;
pub mod service;
pub mod services;
pub mod webhook;

#[cfg(test)]
mod test_support;

pub use catalog::ServiceCatalog;
pub use clients::ClientSet;
pub use error::{AppError, AppResult, CommandError, RegistryError, ServiceError, WebhookError};
pub use lifecycle::{ConfigureOutcome, ConfigureRequest, LifecycleManager};
pub use registry::{RegistryBuilder, ServiceRegistry};
pub use router::{CommandRouter, Dispatch};
pub use service::{
    AccessPolicy, BackgroundTask, Command, CommandRequest, CommandResult, PostRegister, Reply,
    Service, ServiceMeta, WebhookRequest,
};
pub use webhook::WebhookDispatcher;
