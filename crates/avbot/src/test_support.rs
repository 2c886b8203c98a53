//! Shared fixtures for unit tests.

use crate::error::{CommandError, WebhookError};
use crate::registry::ServiceRegistry;
use crate::service::{
    AccessPolicy, BackgroundTask, Command, CommandRequest, PostRegister, Reply, Service,
    ServiceMeta, WebhookRequest,
};
use async_trait::async_trait;
use matrix_client::{ChatClient, MatrixError, ROOM_MESSAGE};
use mockall::mock;
use serde::{Deserialize, Serialize};
use service_store::{ServiceRecord, ServiceStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

mock! {
    pub Chat {}

    #[async_trait]
    impl ChatClient for Chat {
        fn user_id(&self) -> &str;
        async fn send_message_event(
            &self,
            room_id: &str,
            event_type: &str,
            content: &serde_json::Value,
        ) -> Result<String, MatrixError>;
        async fn join_room(&self, room_id: &str) -> Result<(), MatrixError>;
        async fn upload_to_content_repo(
            &self,
            data: Vec<u8>,
            content_type: &str,
            length: u64,
        ) -> Result<String, MatrixError>;
        async fn send_image(
            &self,
            room_id: &str,
            filename: &str,
            content_uri: &str,
        ) -> Result<String, MatrixError>;
        async fn user_typing(
            &self,
            room_id: &str,
            typing: bool,
            timeout_ms: u64,
        ) -> Result<(), MatrixError>;
    }
}

/// A mock client that only knows its user ID. Any other call panics unless
/// the test adds an expectation.
pub fn mock_client(user_id: &str) -> MockChat {
    let mut client = MockChat::new();
    client.expect_user_id().return_const(user_id.to_string());
    client
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestConfig {
    #[serde(default)]
    pub commands: Vec<Vec<String>>,
    #[serde(default)]
    pub fail_register: bool,
    #[serde(default)]
    pub delete: bool,
    #[serde(default)]
    pub task: bool,
    #[serde(default)]
    pub rooms: Option<Vec<String>>,
    #[serde(default)]
    pub users: Option<Vec<String>>,
}

/// Configurable service used by the core tests. Types `hook`, `plain` and
/// `cmd` share this implementation; only `hook` accepts webhooks.
pub struct TestService {
    meta: ServiceMeta,
    config: TestConfig,
    stops: Arc<AtomicUsize>,
}

#[derive(Deserialize)]
struct HookPayload {
    room: String,
    text: String,
}

#[async_trait]
impl Service for TestService {
    fn meta(&self) -> &ServiceMeta {
        &self.meta
    }

    fn load_config(&mut self, config: serde_json::Value) -> Result<(), serde_json::Error> {
        self.config = serde_json::from_value(config)?;
        Ok(())
    }

    fn config(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(&self.config)
    }

    fn access(&self) -> AccessPolicy {
        AccessPolicy {
            rooms: self.config.rooms.clone(),
            users: self.config.users.clone(),
        }
    }

    fn commands(self: Arc<Self>, _client: Arc<dyn ChatClient>) -> Vec<Command> {
        self.config
            .commands
            .iter()
            .map(|path| {
                let id = self.meta.service_id.clone();
                let joined = path.join(" ");
                let segments: Vec<&str> = path.iter().map(String::as_str).collect();
                Command::new(&segments, move |req: CommandRequest| {
                    let id = id.clone();
                    let joined = joined.clone();
                    async move {
                        if joined == "fail" {
                            return Err(CommandError::Upstream("boom".into()));
                        }
                        if joined == "silent" {
                            return Ok(None);
                        }
                        Ok(Some(Reply::notice(format!(
                            "{}:{}:{}",
                            id,
                            joined,
                            req.args.join(" ")
                        ))))
                    }
                })
            })
            .collect()
    }

    async fn register(
        &mut self,
        _old: Option<&dyn Service>,
        _client: Arc<dyn ChatClient>,
    ) -> anyhow::Result<Option<BackgroundTask>> {
        if self.config.fail_register {
            anyhow::bail!("refused");
        }
        if !self.config.task {
            return Ok(None);
        }
        let stops = self.stops.clone();
        Ok(Some(BackgroundTask::spawn(move |token| async move {
            token.cancelled().await;
            stops.fetch_add(1, Ordering::SeqCst);
        })))
    }

    async fn post_register(&self, _old: Option<&dyn Service>) -> PostRegister {
        if self.config.delete {
            PostRegister::Delete
        } else {
            PostRegister::Keep
        }
    }

    async fn on_receive_webhook(
        &self,
        request: WebhookRequest,
        client: Arc<dyn ChatClient>,
    ) -> Result<(), WebhookError> {
        if self.meta.service_type != "hook" {
            return Err(WebhookError::Unsupported);
        }
        if request.header("x-deny").is_some() {
            return Err(WebhookError::Unauthorized);
        }
        let payload: HookPayload = request.json()?;
        let content = Reply::notice(payload.text).to_content();
        if let Err(e) = client
            .send_message_event(&payload.room, ROOM_MESSAGE, &content)
            .await
        {
            tracing::warn!("send failed: {}", e);
        }
        Ok(())
    }
}

pub fn registry_with_stop_counter(stops: Arc<AtomicUsize>) -> ServiceRegistry {
    let mut builder = ServiceRegistry::builder();
    for service_type in ["hook", "plain", "cmd"] {
        let stops = stops.clone();
        builder
            .register(service_type, move |meta| {
                Box::new(TestService {
                    meta,
                    config: TestConfig::default(),
                    stops: stops.clone(),
                }) as Box<dyn Service>
            })
            .unwrap();
    }
    builder.build()
}

pub fn registry_with_test_services() -> ServiceRegistry {
    registry_with_stop_counter(Arc::new(AtomicUsize::new(0)))
}

pub async fn save_record_with(
    store: &Arc<impl ServiceStore>,
    service_id: &str,
    service_type: &str,
    user_id: &str,
    config: serde_json::Value,
) {
    let record = ServiceRecord::new(
        service_id,
        service_type,
        user_id,
        crate::webhook::endpoint_url("http://localhost:4050", service_id),
        config,
    );
    store.save(&record).await.unwrap();
}

pub async fn save_record(
    store: &Arc<impl ServiceStore>,
    service_id: &str,
    service_type: &str,
    user_id: &str,
) {
    save_record_with(store, service_id, service_type, user_id, serde_json::json!({})).await;
}

/// Path list helper for `TestConfig::commands`.
pub fn paths(paths: &[&[&str]]) -> serde_json::Value {
    serde_json::json!({ "commands": paths })
}
