//! The service capability trait and the values it exchanges with the core.

use crate::error::{CommandError, WebhookError};
use crate::format::markdown_render;
use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::HeaderMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use matrix_client::{ChatClient, HtmlMessage, TextMessage};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Identity fields every service instance carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceMeta {
    pub service_id: String,
    pub service_type: String,
    pub service_user_id: String,
    pub webhook_endpoint_url: String,
}

impl ServiceMeta {
    pub fn new(
        service_id: impl Into<String>,
        service_type: impl Into<String>,
        service_user_id: impl Into<String>,
        webhook_endpoint_url: impl Into<String>,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            service_type: service_type.into(),
            service_user_id: service_user_id.into(),
            webhook_endpoint_url: webhook_endpoint_url.into(),
        }
    }
}

/// A reply produced by a command handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Notice(String),
    Text(String),
    Html(HtmlMessage),
}

impl Reply {
    pub fn notice(body: impl Into<String>) -> Self {
        Reply::Notice(body.into())
    }

    pub fn text(body: impl Into<String>) -> Self {
        Reply::Text(body.into())
    }

    /// `m.text` message with the Markdown body rendered to HTML.
    pub fn markdown(body: impl Into<String>) -> Self {
        let body = body.into();
        let html = markdown_render(&body);
        Reply::Html(HtmlMessage::new("m.text", body, html))
    }

    /// Plain body of the reply.
    pub fn body(&self) -> &str {
        match self {
            Reply::Notice(body) | Reply::Text(body) => body,
            Reply::Html(msg) => &msg.body,
        }
    }

    /// Event content for `m.room.message`.
    pub fn to_content(&self) -> serde_json::Value {
        let value = match self {
            Reply::Notice(body) => serde_json::to_value(TextMessage::notice(body.as_str())),
            Reply::Text(body) => serde_json::to_value(TextMessage::text(body.as_str())),
            Reply::Html(msg) => serde_json::to_value(msg),
        };
        // Plain string-field structs always serialize.
        value.unwrap_or_default()
    }
}

/// Arguments handed to a command handler.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub room_id: String,
    pub user_id: String,
    /// Tokens following the matched command path.
    pub args: Vec<String>,
}

/// Result of a command handler. `Ok(None)` means the handler replied itself
/// (or chose not to).
pub type CommandResult = Result<Option<Reply>, CommandError>;

type CommandFn = Arc<dyn Fn(CommandRequest) -> BoxFuture<'static, CommandResult> + Send + Sync>;

/// A chat command: a path of segments plus its handler.
#[derive(Clone)]
pub struct Command {
    pub path: Vec<String>,
    handler: CommandFn,
}

impl Command {
    pub fn new<F, Fut>(path: &[&str], handler: F) -> Self
    where
        F: Fn(CommandRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CommandResult> + Send + 'static,
    {
        Self {
            path: path.iter().map(|s| s.to_string()).collect(),
            handler: Arc::new(move |request| handler(request).boxed()),
        }
    }

    pub async fn invoke(&self, request: CommandRequest) -> CommandResult {
        (self.handler)(request).await
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command").field("path", &self.path).finish()
    }
}

/// Who may run a service's commands. `None` means unrestricted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    pub rooms: Option<Vec<String>>,
    pub users: Option<Vec<String>>,
}

impl AccessPolicy {
    pub fn allows(&self, room_id: &str, user_id: &str) -> bool {
        let room_ok = self
            .rooms
            .as_ref()
            .map_or(true, |rooms| rooms.iter().any(|r| r == room_id));
        let user_ok = self
            .users
            .as_ref()
            .map_or(true, |users| users.iter().any(|u| u == user_id));
        room_ok && user_ok
    }
}

/// Decision returned by [`Service::post_register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostRegister {
    Keep,
    /// The configuration is degenerate; remove the service.
    Delete,
}

/// Inbound webhook request.
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    pub body: Bytes,
    pub headers: HeaderMap,
}

impl WebhookRequest {
    pub fn new(body: impl Into<Bytes>, headers: HeaderMap) -> Self {
        Self {
            body: body.into(),
            headers,
        }
    }

    /// Decode the JSON body into the payload shape a service expects.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, WebhookError> {
        serde_json::from_slice(&self.body).map_err(|e| WebhookError::Decode(e.to_string()))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A long-running task owned by a service instance.
///
/// The task receives a cancellation token and must return promptly once it
/// is cancelled.
pub struct BackgroundTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    pub fn spawn<F, Fut>(task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let handle = tokio::spawn(task(token.clone()));
        Self { token, handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the task and wait for it to finish.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                warn!("Background task panicked: {}", e);
            }
        }
    }
}

/// A configured, addressable unit contributing chat commands and/or handling
/// webhooks.
#[async_trait]
pub trait Service: Send + Sync {
    fn meta(&self) -> &ServiceMeta;

    fn service_id(&self) -> &str {
        &self.meta().service_id
    }

    fn service_type(&self) -> &str {
        &self.meta().service_type
    }

    fn service_user_id(&self) -> &str {
        &self.meta().service_user_id
    }

    /// Replace this instance's configuration from its JSON form.
    fn load_config(&mut self, config: serde_json::Value) -> Result<(), serde_json::Error>;

    /// JSON form of this instance's configuration.
    fn config(&self) -> Result<serde_json::Value, serde_json::Error>;

    /// Rooms and users allowed to run this service's commands.
    fn access(&self) -> AccessPolicy {
        AccessPolicy::default()
    }

    /// Commands contributed by this instance. Queried on every dispatch.
    fn commands(self: Arc<Self>, _client: Arc<dyn ChatClient>) -> Vec<Command> {
        Vec::new()
    }

    /// Validate and react to new configuration before it is persisted.
    async fn register(
        &mut self,
        _old: Option<&dyn Service>,
        _client: Arc<dyn ChatClient>,
    ) -> anyhow::Result<Option<BackgroundTask>> {
        Ok(None)
    }

    /// Runs after the configuration is persisted.
    async fn post_register(&self, _old: Option<&dyn Service>) -> PostRegister {
        PostRegister::Keep
    }

    async fn on_receive_webhook(
        &self,
        _request: WebhookRequest,
        _client: Arc<dyn ChatClient>,
    ) -> Result<(), WebhookError> {
        Err(WebhookError::Unsupported)
    }
}
