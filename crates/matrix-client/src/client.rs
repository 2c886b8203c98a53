//! Matrix HTTP client.

use crate::error::MatrixError;
use crate::types::*;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{debug, instrument, warn};
use urlencoding::encode;

/// Timeout for every request except `/sync`.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Slack a `/sync` request gets on top of its long-poll timeout.
const SYNC_MARGIN: Duration = Duration::from_secs(30);

/// Chat capability consumed by services.
///
/// The bot never manages the session or sync loop through this trait; it is
/// handed a ready client.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// The Matrix user ID this client acts as.
    fn user_id(&self) -> &str;

    /// Send an event of `event_type` with JSON `content` into a room.
    /// Returns the event ID.
    async fn send_message_event(
        &self,
        room_id: &str,
        event_type: &str,
        content: &serde_json::Value,
    ) -> Result<String, MatrixError>;

    /// Join a room by ID or alias.
    async fn join_room(&self, room_id: &str) -> Result<(), MatrixError>;

    /// Upload raw bytes to the content repository. Returns the `mxc://` URI.
    async fn upload_to_content_repo(
        &self,
        data: Vec<u8>,
        content_type: &str,
        length: u64,
    ) -> Result<String, MatrixError>;

    /// Send an `m.image` message referencing an uploaded URI.
    async fn send_image(
        &self,
        room_id: &str,
        filename: &str,
        content_uri: &str,
    ) -> Result<String, MatrixError>;

    /// Set or clear the typing indicator.
    async fn user_typing(
        &self,
        room_id: &str,
        typing: bool,
        timeout_ms: u64,
    ) -> Result<(), MatrixError>;
}

/// Matrix client-server API client.
///
/// The access token is stored as a `SecretString` so it never shows up in
/// debug output.
#[derive(Clone)]
pub struct MatrixClient {
    client: Client,
    homeserver_url: String,
    user_id: String,
    access_token: SecretString,
}

impl MatrixClient {
    /// Create a new Matrix client.
    pub fn new(
        homeserver_url: impl Into<String>,
        user_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Result<Self, MatrixError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            homeserver_url: homeserver_url.into().trim_end_matches('/').to_string(),
            user_id: user_id.into(),
            access_token: SecretString::new(access_token.into()),
        })
    }

    /// Replace the timeout for regular requests. `/sync` always waits for
    /// its long-poll timeout plus a margin.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Result<Self, MatrixError> {
        self.client = Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    /// Get the configured homeserver URL.
    pub fn homeserver_url(&self) -> &str {
        &self.homeserver_url
    }

    fn client_url(&self, path: &str) -> String {
        format!("{}/_matrix/client/v3{}", self.homeserver_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header(
            "Authorization",
            format!("Bearer {}", self.access_token.expose_secret()),
        )
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: Response,
    ) -> Result<T, MatrixError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        let parsed: Option<ErrorResponse> = serde_json::from_str(&body).ok();
        if status.as_u16() == 401 {
            return Err(MatrixError::Unauthorized);
        }

        let (errcode, message) = match parsed {
            Some(e) => (e.errcode, e.error),
            None => ("M_UNKNOWN".to_string(), body),
        };
        warn!(status = status.as_u16(), %errcode, "Matrix API error: {}", message);
        Err(MatrixError::Api {
            status: status.as_u16(),
            errcode,
            message,
        })
    }

    /// Check that the access token is valid for the configured user.
    pub async fn health_check(&self) -> bool {
        match self.whoami().await {
            Ok(user_id) => user_id == self.user_id,
            Err(_) => false,
        }
    }

    /// Resolve the user ID owning the access token.
    #[instrument(skip(self))]
    pub async fn whoami(&self) -> Result<String, MatrixError> {
        let response = self
            .authorized(self.client.get(self.client_url("/account/whoami")))
            .send()
            .await?;

        let whoami: WhoAmIResponse = self.handle_response(response).await?;
        Ok(whoami.user_id)
    }

    /// Run one `/sync` request.
    #[instrument(skip(self))]
    pub async fn sync(
        &self,
        since: Option<&str>,
        timeout: Duration,
    ) -> Result<SyncResponse, MatrixError> {
        let mut query = vec![("timeout", timeout.as_millis().to_string())];
        if let Some(since) = since {
            query.push(("since", since.to_string()));
        }

        let response = self
            .authorized(self.client.get(self.client_url("/sync")))
            .query(&query)
            .timeout(timeout + SYNC_MARGIN)
            .send()
            .await?;

        let sync: SyncResponse = self.handle_response(response).await?;
        debug!(
            "Synced {} joined rooms, {} invites",
            sync.rooms.join.len(),
            sync.rooms.invite.len()
        );
        Ok(sync)
    }
}

#[async_trait]
impl ChatClient for MatrixClient {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    #[instrument(skip(self, content))]
    async fn send_message_event(
        &self,
        room_id: &str,
        event_type: &str,
        content: &serde_json::Value,
    ) -> Result<String, MatrixError> {
        let txn_id = uuid::Uuid::new_v4().simple().to_string();
        let url = self.client_url(&format!(
            "/rooms/{}/send/{}/{}",
            encode(room_id),
            encode(event_type),
            txn_id
        ));

        let response = self
            .authorized(self.client.put(url))
            .json(content)
            .send()
            .await?;

        let sent: SendEventResponse = self.handle_response(response).await?;
        debug!("Sent {} to {}", event_type, room_id);
        Ok(sent.event_id)
    }

    #[instrument(skip(self))]
    async fn join_room(&self, room_id: &str) -> Result<(), MatrixError> {
        let response = self
            .authorized(
                self.client
                    .post(self.client_url(&format!("/join/{}", encode(room_id)))),
            )
            .json(&serde_json::json!({}))
            .send()
            .await?;

        let joined: JoinRoomResponse = self.handle_response(response).await?;
        debug!("Joined {}", joined.room_id);
        Ok(())
    }

    #[instrument(skip(self, data))]
    async fn upload_to_content_repo(
        &self,
        data: Vec<u8>,
        content_type: &str,
        length: u64,
    ) -> Result<String, MatrixError> {
        let response = self
            .authorized(
                self.client
                    .post(format!("{}/_matrix/media/v3/upload", self.homeserver_url)),
            )
            .header("Content-Type", content_type)
            .body(data)
            .send()
            .await?;

        let uploaded: UploadResponse = self.handle_response(response).await?;
        debug!(length, "Uploaded {} to {}", content_type, uploaded.content_uri);
        Ok(uploaded.content_uri)
    }

    async fn send_image(
        &self,
        room_id: &str,
        filename: &str,
        content_uri: &str,
    ) -> Result<String, MatrixError> {
        let content = ImageMessage {
            msgtype: "m.image".into(),
            body: filename.into(),
            url: content_uri.into(),
        };
        self.send_message_event(room_id, ROOM_MESSAGE, &serde_json::to_value(content)?)
            .await
    }

    async fn user_typing(
        &self,
        room_id: &str,
        typing: bool,
        timeout_ms: u64,
    ) -> Result<(), MatrixError> {
        let url = self.client_url(&format!(
            "/rooms/{}/typing/{}",
            encode(room_id),
            encode(&self.user_id)
        ));
        let request = TypingRequest {
            typing,
            timeout: typing.then_some(timeout_ms),
        };

        let response = self
            .authorized(self.client.put(url))
            .json(&request)
            .send()
            .await?;

        let _: serde_json::Value = self.handle_response(response).await?;
        Ok(())
    }
}
