//! Relays Gitea push webhooks into the rooms bound to the pushed repository.
//!
//! Gitea has to be pointed at the service's webhook URL by hand; it is
//! written into the config as `webhook_url` when the service registers.

use crate::error::WebhookError;
use crate::format::render_template;
use crate::matching::{is_empty, matching_rooms, RoomBindings};
use crate::service::{BackgroundTask, PostRegister, Reply, Service, ServiceMeta, WebhookRequest};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use matrix_client::{ChatClient, ROOM_MESSAGE};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{error, info, warn};

pub const SERVICE_TYPE: &str = "gitea";

/// Header carrying the hex HMAC-SHA256 of the body.
pub const SIGNATURE_HEADER: &str = "x-gitea-signature";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GiteaConfig {
    /// Populated on register.
    #[serde(default)]
    pub webhook_url: String,
    /// Room ID to repository bindings.
    #[serde(default)]
    pub rooms: BTreeMap<String, RoomRepos>,
    /// Shared secret configured in Gitea. Requests are verified when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomRepos {
    #[serde(default)]
    pub repos: BTreeMap<String, RepoSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoSettings {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub template: String,
}

#[derive(Debug, Deserialize)]
struct PushNotification {
    #[serde(default, rename = "ref")]
    git_ref: String,
    #[serde(default)]
    compare_url: String,
    #[serde(default)]
    commits: Vec<Commit>,
    repository: Repository,
}

#[derive(Debug, Deserialize)]
struct Commit {
    #[serde(default)]
    id: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    author: Person,
}

#[derive(Debug, Default, Deserialize)]
struct Person {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct Repository {
    full_name: String,
}

pub struct GiteaService {
    meta: ServiceMeta,
    config: GiteaConfig,
}

impl GiteaService {
    pub fn new(meta: ServiceMeta) -> Self {
        Self {
            meta,
            config: GiteaConfig::default(),
        }
    }

    fn bindings(&self) -> RoomBindings<RepoSettings> {
        self.config
            .rooms
            .iter()
            .map(|(room, data)| (room.clone(), data.repos.clone()))
            .collect()
    }

    fn verify_signature(&self, request: &WebhookRequest) -> Result<(), WebhookError> {
        let Some(secret) = self.config.secret.as_deref() else {
            return Ok(());
        };
        let signature = request
            .header(SIGNATURE_HEADER)
            .and_then(|sig| hex::decode(sig.trim()).ok())
            .ok_or(WebhookError::Unauthorized)?;

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .map_err(|_| WebhookError::Unauthorized)?;
        mac.update(&request.body);
        mac.verify_slice(&signature)
            .map_err(|_| WebhookError::Unauthorized)
    }
}

fn render_push(push: &PushNotification, commit: &Commit, template: &str) -> String {
    if template.is_empty() {
        return format!(
            "Gitea commit from User **{}** in Repo **{}**\n*{}* \n[Commit]({}) \n",
            commit.author.name, push.repository.full_name, commit.message, commit.url
        );
    }

    let branch = push
        .git_ref
        .strip_prefix("refs/heads/")
        .unwrap_or(&push.git_ref);
    let short_id: String = commit.id.chars().take(7).collect();

    let mut vars = HashMap::new();
    vars.insert("repository", push.repository.full_name.clone());
    vars.insert("branch", branch.to_string());
    vars.insert("commit", short_id);
    vars.insert("author", commit.author.name.clone());
    vars.insert("message", commit.message.clone());
    vars.insert("compare_url", push.compare_url.clone());
    vars.insert("commit_url", commit.url.clone());
    render_template(template, &vars)
}

#[async_trait]
impl Service for GiteaService {
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
        info!(service_id = %self.meta.service_id, "Gitea webhook URL: {}", self.config.webhook_url);
        join_rooms(client.as_ref(), self.config.rooms.keys()).await;
        Ok(None)
    }

    async fn post_register(&self, _old: Option<&dyn Service>) -> PostRegister {
        if is_empty(&self.bindings()) {
            info!(service_id = %self.meta.service_id, "No repositories registered");
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
        self.verify_signature(&request)?;
        let push: PushNotification = request.json()?;

        let Some(commit) = push.commits.first() else {
            info!(repo = %push.repository.full_name, "Push without commits");
            return Ok(());
        };

        let bindings = self.bindings();
        for target in matching_rooms(&bindings, &push.repository.full_name) {
            let message = render_push(&push, commit, &target.value.template);
            let content = Reply::markdown(message).to_content();

            info!(
                repo = %push.repository.full_name,
                room_id = %target.room_id,
                "Sending Gitea notification to room"
            );
            if let Err(e) = client
                .send_message_event(target.room_id, ROOM_MESSAGE, &content)
                .await
            {
                warn!(room_id = %target.room_id, "Failed to send Gitea notification: {}", e);
            }
        }
        Ok(())
    }
}

/// Join every bound room, logging failures.
pub(crate) async fn join_rooms<'a>(
    client: &dyn ChatClient,
    rooms: impl IntoIterator<Item = &'a String>,
) {
    for room_id in rooms {
        if let Err(e) = client.join_room(room_id).await {
            error!(room_id = %room_id, user_id = %client.user_id(), "Failed to join room: {}", e);
        }
    }
}
