//! Built-in service types.

pub mod echo;
pub mod gitea;
pub mod invoice;
pub mod nlp;
pub mod ollama;
pub mod unifi_protect;
pub mod wekan;

use crate::error::RegistryError;
use crate::registry::RegistryBuilder;
use crate::service::Service;
use std::sync::Arc;
use std::time::Duration;

/// Timeout for outbound calls to third-party services.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Outbound HTTP client shared by all service instances.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .build()
}

/// Register every built-in service type.
///
/// State that outlives a single instance (model contexts, NLP sessions) is
/// created here and captured by the factories.
pub fn register_all(builder: &mut RegistryBuilder, http: reqwest::Client) -> Result<(), RegistryError> {
    builder.register(echo::SERVICE_TYPE, |meta| {
        Box::new(echo::EchoService::new(meta)) as Box<dyn Service>
    })?;

    builder.register(gitea::SERVICE_TYPE, |meta| {
        Box::new(gitea::GiteaService::new(meta)) as Box<dyn Service>
    })?;

    builder.register(wekan::SERVICE_TYPE, |meta| {
        Box::new(wekan::WekanService::new(meta)) as Box<dyn Service>
    })?;

    let client = http.clone();
    builder.register(invoice::SERVICE_TYPE, move |meta| {
        Box::new(invoice::InvoiceService::new(meta, client.clone())) as Box<dyn Service>
    })?;

    let client = http.clone();
    let sessions: nlp::NlpSessions = Arc::default();
    builder.register(nlp::SERVICE_TYPE, move |meta| {
        Box::new(nlp::NlpService::new(meta, client.clone(), sessions.clone())) as Box<dyn Service>
    })?;

    let client = http.clone();
    let contexts: ollama::OllamaContexts = Arc::default();
    builder.register(ollama::SERVICE_TYPE, move |meta| {
        Box::new(ollama::OllamaService::new(meta, client.clone(), contexts.clone()))
            as Box<dyn Service>
    })?;

    builder.register(unifi_protect::SERVICE_TYPE, move |meta| {
        Box::new(unifi_protect::UnifiProtectService::new(meta, http.clone())) as Box<dyn Service>
    })?;

    Ok(())
}
