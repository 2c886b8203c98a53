//! Forwards `!nlp` text to a conversational NLP gateway.
//!
//! The gateway is stateless; the bot keeps the last response per user and
//! sends it back with the next message so the conversation can continue.

use crate::service::{Command, CommandRequest, CommandResult, Reply, Service, ServiceMeta};
use async_trait::async_trait;
use dashmap::DashMap;
use matrix_client::ChatClient;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

pub const SERVICE_TYPE: &str = "nlp";

/// Last gateway response per user ID.
pub type NlpSessions = Arc<DashMap<String, Value>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NlpConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

impl Default for NlpConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
        }
    }
}

fn default_endpoint() -> String {
    "http://localhost:8080/gateway/api/v1".into()
}

pub struct NlpService {
    meta: ServiceMeta,
    config: NlpConfig,
    http: reqwest::Client,
    sessions: NlpSessions,
}

impl NlpService {
    pub fn new(meta: ServiceMeta, http: reqwest::Client, sessions: NlpSessions) -> Self {
        Self {
            meta,
            config: NlpConfig::default(),
            http,
            sessions,
        }
    }

    async fn forward(&self, req: CommandRequest) -> CommandResult {
        let mut state = self
            .sessions
            .get(&req.user_id)
            .map(|s| s.value().clone())
            .filter(Value::is_object)
            .unwrap_or_else(|| json!({ "complete": true }));
        state["input"] = Value::String(req.args.join(" "));
        state["owner"] = Value::String(req.user_id.clone());

        let body = self
            .http
            .post(&self.config.endpoint)
            .json(&state)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let response: Value = match serde_json::from_str(&body) {
            Ok(v) => v,
            Err(e) => {
                warn!(user_id = %req.user_id, "NLP gateway returned no usable response: {}", e);
                return Ok(None);
            }
        };

        let speech: String = response
            .get("speechResponse")
            .and_then(Value::as_array)
            .map(|parts| parts.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        debug!(user_id = %req.user_id, "NLP reply: {}", speech);

        self.sessions.insert(req.user_id, response);
        Ok(Some(Reply::markdown(speech)))
    }
}

#[async_trait]
impl Service for NlpService {
    fn meta(&self) -> &ServiceMeta {
        &self.meta
    }

    fn load_config(&mut self, config: Value) -> Result<(), serde_json::Error> {
        self.config = serde_json::from_value(config)?;
        Ok(())
    }

    fn config(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(&self.config)
    }

    fn commands(self: Arc<Self>, _client: Arc<dyn ChatClient>) -> Vec<Command> {
        vec![Command::new(&["nlp"], move |req: CommandRequest| {
            let this = self.clone();
            async move { this.forward(req).await }
        })]
    }
}
