//! UniFi Protect: alarm webhooks, and optionally the NVR's live event feed
//! (doorbell rings and smart detections with thumbnails).

mod events;
mod nvr;

pub use events::{classify, run_event_stream, EventSink, Notification, UpdateAction, UpdatePacket};
pub use nvr::{Bootstrap, NvrClient, NvrError};

use crate::error::WebhookError;
use crate::format::markdown_render;
use crate::service::{
    AccessPolicy, BackgroundTask, Command, CommandRequest, Reply, Service, ServiceMeta,
    WebhookRequest,
};
use async_trait::async_trait;
use matrix_client::{ChatClient, HtmlMessage, ROOM_MESSAGE};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub const SERVICE_TYPE: &str = "unifi_protect";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiProtectConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Room receiving notifications; commands are limited to it.
    #[serde(default)]
    pub room_id: String,
    /// Follow the NVR update feed in the background.
    #[serde(default)]
    pub event_stream: bool,
    /// Use https/wss towards the NVR.
    #[serde(default = "default_secure")]
    pub secure: bool,
    #[serde(default = "default_thumbnail_delay", with = "humantime_serde")]
    pub thumbnail_delay: Duration,
}

impl Default for UnifiProtectConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            user: String::new(),
            password: String::new(),
            room_id: String::new(),
            event_stream: false,
            secure: default_secure(),
            thumbnail_delay: default_thumbnail_delay(),
        }
    }
}

fn default_port() -> u16 {
    443
}

fn default_secure() -> bool {
    true
}

fn default_thumbnail_delay() -> Duration {
    Duration::from_secs(5)
}

#[derive(Debug, Deserialize)]
struct AlarmNotification {
    alarm: Alarm,
}

#[derive(Debug, Deserialize)]
struct Alarm {
    #[serde(default)]
    name: String,
    #[serde(default)]
    triggers: Vec<Trigger>,
}

#[derive(Debug, Deserialize)]
struct Trigger {
    #[serde(default)]
    key: String,
}

pub struct UnifiProtectService {
    meta: ServiceMeta,
    config: UnifiProtectConfig,
    http: reqwest::Client,
}

impl UnifiProtectService {
    pub fn new(meta: ServiceMeta, http: reqwest::Client) -> Self {
        Self {
            meta,
            config: UnifiProtectConfig::default(),
            http,
        }
    }

    fn nvr(&self) -> NvrClient {
        NvrClient::new(
            self.http.clone(),
            &self.config.host,
            self.config.port,
            self.config.secure,
            self.config.user.clone(),
            SecretString::new(self.config.password.clone()),
        )
    }
}

fn alarm_message(alarm: &Alarm) -> String {
    let mut message = format!("<i>{}</i> triggered by: ", alarm.name);
    for trigger in &alarm.triggers {
        message.push_str(&trigger.key);
        message.push(' ');
    }
    message
}

#[async_trait]
impl Service for UnifiProtectService {
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
            rooms: (!self.config.room_id.is_empty()).then(|| vec![self.config.room_id.clone()]),
            users: None,
        }
    }

    fn commands(self: Arc<Self>, _client: Arc<dyn ChatClient>) -> Vec<Command> {
        vec![Command::new(&["unifi_protect"], |req: CommandRequest| async move {
            Ok(Some(Reply::notice(req.args.join(" "))))
        })]
    }

    async fn register(
        &mut self,
        _old: Option<&dyn Service>,
        client: Arc<dyn ChatClient>,
    ) -> anyhow::Result<Option<BackgroundTask>> {
        if !self.config.event_stream {
            return Ok(None);
        }
        if self.config.host.is_empty() || self.config.room_id.is_empty() {
            anyhow::bail!("event_stream needs host and room_id");
        }

        let sink = EventSink {
            nvr: Arc::new(self.nvr()),
            client,
            room_id: self.config.room_id.clone(),
            thumbnail_delay: self.config.thumbnail_delay,
        };
        info!(service_id = %self.meta.service_id, host = %self.config.host, "Starting NVR event feed");
        Ok(Some(BackgroundTask::spawn(move |token| run_event_stream(sink, token))))
    }

    async fn on_receive_webhook(
        &self,
        request: WebhookRequest,
        client: Arc<dyn ChatClient>,
    ) -> Result<(), WebhookError> {
        let notification: AlarmNotification = request.json()?;
        info!(service_id = %self.meta.service_id, alarm = %notification.alarm.name, "Received UniFi Protect alarm");

        if self.config.room_id.is_empty() {
            warn!(service_id = %self.meta.service_id, "No room configured for alarms");
            return Ok(());
        }

        let message = alarm_message(&notification.alarm);
        let content =
            Reply::Html(HtmlMessage::new("m.notice", message.as_str(), markdown_render(&message)))
                .to_content();
        if let Err(e) = client
            .send_message_event(&self.config.room_id, ROOM_MESSAGE, &content)
            .await
        {
            error!(room_id = %self.config.room_id, "Failed to send alarm notification: {}", e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::mock_client;
    use axum::http::HeaderMap;
    use serde_json::json;

    fn service(config: serde_json::Value) -> UnifiProtectService {
        let mut s = UnifiProtectService::new(
            ServiceMeta::new("cam", SERVICE_TYPE, "@bot:x", ""),
            reqwest::Client::new(),
        );
        s.load_config(config).unwrap();
        s
    }

    #[test]
    fn test_config_defaults_and_access() {
        let s = service(json!({ "room_id": "!cam:x", "thumbnail_delay": "2s" }));
        assert_eq!(s.config.port, 443);
        assert!(s.config.secure);
        assert_eq!(s.config.thumbnail_delay, Duration::from_secs(2));

        let policy = s.access();
        assert!(policy.allows("!cam:x", "@anyone:x"));
        assert!(!policy.allows("!other:x", "@anyone:x"));

        assert_eq!(service(json!({})).access(), AccessPolicy::default());
    }

    #[tokio::test]
    async fn test_alarm_webhook() {
        let s = service(json!({ "room_id": "!cam:x" }));
        let mut client = mock_client("@bot:x");
        client
            .expect_send_message_event()
            .withf(|room, _, content| {
                room == "!cam:x"
                    && content["body"] == "<i>Front door</i> triggered by: motion person "
                    && content["msgtype"] == "m.notice"
            })
            .times(1)
            .returning(|_, _, _| Ok("$ev".into()));

        let body = json!({
            "alarm": {
                "name": "Front door",
                "triggers": [{ "key": "motion", "device": "d1" }, { "key": "person", "device": "d1" }]
            },
            "timestamp": 1700000000
        });
        s.on_receive_webhook(
            WebhookRequest::new(body.to_string(), HeaderMap::new()),
            Arc::new(client),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_alarm_webhook_rejects_bad_payload() {
        let s = service(json!({ "room_id": "!cam:x" }));
        let result = s
            .on_receive_webhook(
                WebhookRequest::new(r#"{"nope":1}"#, HeaderMap::new()),
                Arc::new(mock_client("@bot:x")),
            )
            .await;
        assert!(matches!(result, Err(WebhookError::Decode(_))));
    }

    #[tokio::test]
    async fn test_register_without_event_stream() {
        let mut s = service(json!({ "room_id": "!cam:x" }));
        let task = s.register(None, Arc::new(mock_client("@bot:x"))).await.unwrap();
        assert!(task.is_none());

        let mut s = service(json!({ "event_stream": true }));
        assert!(s.register(None, Arc::new(mock_client("@bot:x"))).await.is_err());
    }

    #[tokio::test]
    async fn test_register_starts_cancellable_feed() {
        let mut s = service(json!({
            "host": "127.0.0.1",
            "port": 9,
            "secure": false,
            "room_id": "!cam:x",
            "event_stream": true
        }));
        let task = s
            .register(None, Arc::new(mock_client("@bot:x")))
            .await
            .unwrap()
            .unwrap();
        tokio::time::timeout(Duration::from_secs(2), task.stop())
            .await
            .unwrap();
    }
}
