//! Relays Wekan board webhooks into bound rooms.

use crate::error::WebhookError;
use crate::format::render_template;
use crate::matching::{is_empty, matching_rooms, RoomBindings};
use crate::service::{BackgroundTask, PostRegister, Reply, Service, ServiceMeta, WebhookRequest};
use crate::services::gitea::join_rooms;
use async_trait::async_trait;
use matrix_client::{ChatClient, ROOM_MESSAGE};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

pub const SERVICE_TYPE: &str = "wekan";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WekanConfig {
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default)]
    pub rooms: BTreeMap<String, RoomBoards>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomBoards {
    /// Board IDs, or `*` for every board.
    #[serde(default)]
    pub boards: BTreeMap<String, BoardSettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardSettings {
    /// Message template; the card event's own text when empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub template: String,
}

/// Card event posted by Wekan. Only the fields the bot reads.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BoardNotification {
    board_id: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    card_id: String,
    #[serde(default)]
    list_id: String,
    #[serde(default)]
    user: String,
    #[serde(default)]
    card: String,
    #[serde(default)]
    description: String,
}

impl BoardNotification {
    fn render(&self, template: &str) -> String {
        if template.is_empty() {
            return self.text.clone();
        }
        let mut vars = HashMap::new();
        vars.insert("text", self.text.clone());
        vars.insert("board", self.board_id.clone());
        vars.insert("card_id", self.card_id.clone());
        vars.insert("list", self.list_id.clone());
        vars.insert("user", self.user.clone());
        vars.insert("card", self.card.clone());
        vars.insert("description", self.description.clone());
        render_template(template, &vars)
    }
}

pub struct WekanService {
    meta: ServiceMeta,
    config: WekanConfig,
}

impl WekanService {
    pub fn new(meta: ServiceMeta) -> Self {
        Self {
            meta,
            config: WekanConfig::default(),
        }
    }

    fn bindings(&self) -> RoomBindings<BoardSettings> {
        self.config
            .rooms
            .iter()
            .map(|(room, data)| (room.clone(), data.boards.clone()))
            .collect()
    }
}

#[async_trait]
impl Service for WekanService {
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

    async fn register(
        &mut self,
        _old: Option<&dyn Service>,
        client: Arc<dyn ChatClient>,
    ) -> anyhow::Result<Option<BackgroundTask>> {
        self.config.webhook_url = self.meta.webhook_endpoint_url.clone();
        info!(service_id = %self.meta.service_id, "Wekan webhook URL: {}", self.config.webhook_url);
        join_rooms(client.as_ref(), self.config.rooms.keys()).await;
        Ok(None)
    }

    async fn post_register(&self, _old: Option<&dyn Service>) -> PostRegister {
        if is_empty(&self.bindings()) {
            info!(service_id = %self.meta.service_id, "No boards registered");
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
        let notification: BoardNotification = request.json()?;

        let bindings = self.bindings();
        for target in matching_rooms(&bindings, &notification.board_id) {
            let content = Reply::text(notification.render(&target.value.template)).to_content();
            info!(board = %notification.board_id, room_id = %target.room_id, "Sending Wekan notification to room");
            if let Err(e) = client
                .send_message_event(target.room_id, ROOM_MESSAGE, &content)
                .await
            {
                warn!(room_id = %target.room_id, "Failed to send Wekan notification: {}", e);
            }
        }
        Ok(())
    }
}
