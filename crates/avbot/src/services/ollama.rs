//! Chat with a local Ollama model. Each room keeps its own model context.

use crate::error::CommandError;
use crate::format::markdown_render;
use crate::service::{BackgroundTask, Command, CommandRequest, CommandResult, Reply, Service, ServiceMeta};
use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use matrix_client::{ChatClient, HtmlMessage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub const SERVICE_TYPE: &str = "ollama";

/// Typing indicator timeout while a generation runs.
const TYPING_TIMEOUT_MS: u64 = 900_000;

/// Model context per room ID.
pub type OllamaContexts = Arc<DashMap<String, Vec<i64>>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub model: String,
    /// Upper bound on the context tokens kept per room.
    #[serde(default = "default_context_size")]
    pub context_size: usize,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            model: String::new(),
            context_size: default_context_size(),
        }
    }
}

fn default_host() -> String {
    "localhost".into()
}

fn default_port() -> u16 {
    11434
}

fn default_context_size() -> usize {
    2048
}

impl OllamaConfig {
    pub fn base_url(&self) -> String {
        let host = self.host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            format!("{}:{}", host, self.port)
        } else {
            format!("http://{}:{}", host, self.port)
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    context: &'a [i64],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    context: Vec<i64>,
}

pub struct OllamaService {
    meta: ServiceMeta,
    config: OllamaConfig,
    http: reqwest::Client,
    contexts: OllamaContexts,
}

impl OllamaService {
    pub fn new(meta: ServiceMeta, http: reqwest::Client, contexts: OllamaContexts) -> Self {
        Self {
            meta,
            config: OllamaConfig::default(),
            http,
            contexts,
        }
    }

    async fn generate(&self, room_id: &str, prompt: &str) -> Result<String, CommandError> {
        let context = self
            .contexts
            .get(room_id)
            .map(|c| c.value().clone())
            .unwrap_or_default();

        let request = GenerateRequest {
            model: &self.config.model,
            prompt,
            context: &context,
            stream: false,
        };

        let response: GenerateResponse = self
            .http
            .post(format!("{}/api/generate", self.config.base_url()))
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut updated = context;
        updated.extend(response.context);
        if updated.len() > self.config.context_size {
            let excess = updated.len() - self.config.context_size;
            updated.drain(..excess);
        }
        self.contexts.insert(room_id.to_string(), updated);

        Ok(response.response)
    }

    #[instrument(skip(self, client, req), fields(room_id = %req.room_id))]
    async fn chat(&self, client: Arc<dyn ChatClient>, req: CommandRequest) -> CommandResult {
        let prompt = req.args.join(" ");

        if let Err(e) = client.user_typing(&req.room_id, true, TYPING_TIMEOUT_MS).await {
            warn!("Failed to set typing: {}", e);
        }
        let result = self.generate(&req.room_id, &prompt).await;
        if let Err(e) = client.user_typing(&req.room_id, false, 3000).await {
            warn!("Failed to clear typing: {}", e);
        }

        let answer = result?;
        let html = markdown_render(&answer);
        Ok(Some(Reply::Html(HtmlMessage::new("m.notice", answer, html))))
    }
}

#[async_trait]
impl Service for OllamaService {
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

    fn commands(self: Arc<Self>, client: Arc<dyn ChatClient>) -> Vec<Command> {
        vec![Command::new(&["ollama"], move |req: CommandRequest| {
            let this = self.clone();
            let client = client.clone();
            async move { this.chat(client, req).await }
        })]
    }

    async fn register(
        &mut self,
        _old: Option<&dyn Service>,
        _client: Arc<dyn ChatClient>,
    ) -> anyhow::Result<Option<BackgroundTask>> {
        let url = format!("{}/api/tags", self.config.base_url());
        self.http
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("Failed to reach Ollama at {}", url))?;
        info!(service_id = %self.meta.service_id, model = %self.config.model, "Ollama server reachable");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::mock_client;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(server: &MockServer, contexts: OllamaContexts, context_size: usize) -> OllamaService {
        let mut s = OllamaService::new(
            ServiceMeta::new("llm", SERVICE_TYPE, "@bot:x", ""),
            reqwest::Client::new(),
            contexts,
        );
        let address = server.address();
        s.load_config(json!({
            "host": address.ip().to_string(),
            "port": address.port(),
            "model": "llama3",
            "context_size": context_size
        }))
        .unwrap();
        s
    }

    #[test]
    fn test_base_url() {
        let mut config = OllamaConfig::default();
        assert_eq!(config.base_url(), "http://localhost:11434");
        config.host = "https://llm.example.org/".into();
        config.port = 443;
        assert_eq!(config.base_url(), "https://llm.example.org:443");
    }

    #[tokio::test]
    async fn test_register_checks_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "models": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let mut s = service(&server, Arc::default(), 10);
        assert!(s.register(None, Arc::new(mock_client("@bot:x"))).await.is_ok());
    }

    #[tokio::test]
    async fn test_register_fails_when_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut s = service(&server, Arc::default(), 10);
        assert!(s.register(None, Arc::new(mock_client("@bot:x"))).await.is_err());
    }

    #[tokio::test]
    async fn test_chat_keeps_bounded_room_context() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({ "model": "llama3", "prompt": "hi there", "stream": false })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": "**Hello**",
                "context": [4, 5, 6]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let contexts: OllamaContexts = Arc::default();
        contexts.insert("!r:x".into(), vec![1, 2, 3]);
        let s = Arc::new(service(&server, contexts.clone(), 4));

        let mut client = mock_client("@bot:x");
        client
            .expect_user_typing()
            .withf(|room, _, _| room == "!r:x")
            .times(2)
            .returning(|_, _, _| Ok(()));
        let commands = s.commands(Arc::new(client));

        let reply = commands[0]
            .invoke(CommandRequest {
                room_id: "!r:x".into(),
                user_id: "@u:x".into(),
                args: vec!["hi".into(), "there".into()],
            })
            .await
            .unwrap()
            .unwrap();

        match reply {
            Reply::Html(msg) => {
                assert_eq!(msg.msgtype, "m.notice");
                assert_eq!(msg.body, "**Hello**");
                assert!(msg.formatted_body.contains("<strong>Hello</strong>"));
            }
            other => panic!("unexpected reply {:?}", other),
        }
        assert_eq!(*contexts.get("!r:x").unwrap(), vec![3, 4, 5, 6]);
    }
}
