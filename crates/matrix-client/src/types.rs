//! Matrix client-server API types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Event type used for every room message the bot sends.
pub const ROOM_MESSAGE: &str = "m.room.message";

/// Format marker for HTML message bodies.
pub const HTML_FORMAT: &str = "org.matrix.custom.html";

/// Plain text message content (`m.text`, `m.notice`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextMessage {
    pub msgtype: String,
    pub body: String,
}

impl TextMessage {
    pub fn notice(body: impl Into<String>) -> Self {
        Self {
            msgtype: "m.notice".into(),
            body: body.into(),
        }
    }

    pub fn text(body: impl Into<String>) -> Self {
        Self {
            msgtype: "m.text".into(),
            body: body.into(),
        }
    }
}

/// Message content with an HTML rendering alongside the plain body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HtmlMessage {
    pub body: String,
    pub msgtype: String,
    pub format: String,
    pub formatted_body: String,
}

impl HtmlMessage {
    pub fn new(
        msgtype: impl Into<String>,
        body: impl Into<String>,
        formatted_body: impl Into<String>,
    ) -> Self {
        Self {
            body: body.into(),
            msgtype: msgtype.into(),
            format: HTML_FORMAT.into(),
            formatted_body: formatted_body.into(),
        }
    }
}

/// `m.image` message content pointing at an uploaded `mxc://` URI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMessage {
    pub msgtype: String,
    pub body: String,
    pub url: String,
}

/// Response to sending an event.
#[derive(Debug, Clone, Deserialize)]
pub struct SendEventResponse {
    pub event_id: String,
}

/// Response to joining a room.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinRoomResponse {
    pub room_id: String,
}

/// Response to a media upload.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub content_uri: String,
}

/// Typing notification request.
#[derive(Debug, Clone, Serialize)]
pub struct TypingRequest {
    pub typing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Matrix error body.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub errcode: String,
    #[serde(default)]
    pub error: String,
}

/// Response from `GET /whoami`.
#[derive(Debug, Clone, Deserialize)]
pub struct WhoAmIResponse {
    pub user_id: String,
}

/// Response from `GET /sync`, reduced to what the bot reads.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncResponse {
    pub next_batch: String,
    #[serde(default)]
    pub rooms: SyncRooms,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncRooms {
    #[serde(default)]
    pub join: HashMap<String, JoinedRoom>,
    #[serde(default)]
    pub invite: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JoinedRoom {
    #[serde(default)]
    pub timeline: Timeline,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Timeline {
    #[serde(default)]
    pub events: Vec<RoomEvent>,
}

/// A timeline event.
#[derive(Debug, Clone, Deserialize)]
pub struct RoomEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub sender: String,
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub origin_server_ts: i64,
    #[serde(default)]
    pub content: serde_json::Value,
}

/// Parsed text message for bot processing.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomMessage {
    /// Room the message was sent in.
    pub room_id: String,
    /// Matrix user ID of the sender.
    pub sender: String,
    /// Message body.
    pub text: String,
    /// Event ID of the message.
    pub event_id: String,
    /// Server timestamp in milliseconds.
    pub timestamp: i64,
}

impl RoomMessage {
    /// Extract a text message from a timeline event.
    ///
    /// Only `m.room.message` events with msgtype `m.text` are considered.
    pub fn from_event(room_id: &str, event: &RoomEvent) -> Option<Self> {
        if event.event_type != ROOM_MESSAGE {
            return None;
        }
        if event.content.get("msgtype")?.as_str()? != "m.text" {
            return None;
        }
        let text = event.content.get("body")?.as_str()?.to_string();

        Some(Self {
            room_id: room_id.to_string(),
            sender: event.sender.clone(),
            text,
            event_id: event.event_id.clone(),
            timestamp: event.origin_server_ts,
        })
    }
}

/// An item produced by the sync receiver.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncItem {
    /// A text message in a joined room.
    Message(RoomMessage),
    /// The bot was invited to a room.
    Invite(String),
}
