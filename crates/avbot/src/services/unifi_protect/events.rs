//! The NVR update feed: binary packet decoding and the long-running
//! websocket task that turns camera events into chat notifications.
//!
//! Each websocket message carries two frames, an action frame followed by a
//! data frame. A frame is an 8 byte header (packet type, payload format,
//! deflated flag, reserved, big-endian payload length) and its payload.

use super::nvr::{NvrClient, NvrError};
use crate::format::markdown_render;
use crate::service::Reply;
use flate2::read::ZlibDecoder;
use futures::{SinkExt, StreamExt};
use matrix_client::{ChatClient, HtmlMessage, ROOM_MESSAGE};
use serde::Deserialize;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::connect_async;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

pub const HEADER_LEN: usize = 8;

const ACTION_FRAME: u8 = 1;
const DATA_FRAME: u8 = 2;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Action frame contents.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAction {
    pub action: String,
    #[serde(default)]
    pub new_update_id: String,
    pub model_key: String,
    #[serde(default)]
    pub id: String,
}

/// A decoded update: its action and the raw data frame payload.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePacket {
    pub action: UpdateAction,
    pub data: Vec<u8>,
}

struct Frame {
    packet_type: u8,
    payload: Vec<u8>,
}

fn read_frame(input: &[u8]) -> Result<(Frame, &[u8]), NvrError> {
    if input.len() < HEADER_LEN {
        return Err(NvrError::Packet(format!("short header: {} bytes", input.len())));
    }
    let packet_type = input[0];
    let deflated = input[2] != 0;
    let size = u32::from_be_bytes([input[4], input[5], input[6], input[7]]) as usize;

    let rest = &input[HEADER_LEN..];
    if rest.len() < size {
        return Err(NvrError::Packet(format!(
            "payload truncated: want {} bytes, have {}",
            size,
            rest.len()
        )));
    }
    let (raw, rest) = rest.split_at(size);

    let payload = if deflated {
        let mut out = Vec::new();
        ZlibDecoder::new(raw)
            .read_to_end(&mut out)
            .map_err(|e| NvrError::Packet(format!("inflate failed: {}", e)))?;
        out
    } else {
        raw.to_vec()
    };

    Ok((Frame { packet_type, payload }, rest))
}

impl UpdatePacket {
    pub fn decode(input: &[u8]) -> Result<Self, NvrError> {
        let (action_frame, rest) = read_frame(input)?;
        if action_frame.packet_type != ACTION_FRAME {
            return Err(NvrError::Packet(format!(
                "expected action frame, got type {}",
                action_frame.packet_type
            )));
        }
        let (data_frame, _) = read_frame(rest)?;
        if data_frame.packet_type != DATA_FRAME {
            return Err(NvrError::Packet(format!(
                "expected data frame, got type {}",
                data_frame.packet_type
            )));
        }

        Ok(Self {
            action: serde_json::from_slice(&action_frame.payload)?,
            data: data_frame.payload,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventData {
    #[serde(default, rename = "type")]
    event_type: String,
    #[serde(default)]
    smart_detect_types: Vec<String>,
}

/// What the bot reports for an update.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Ring,
    SmartDetect { event_id: String, types: Vec<String> },
}

/// Map an update to a notification. Only event updates produce one.
pub fn classify(packet: &UpdatePacket) -> Option<Notification> {
    if packet.action.model_key != "event" {
        return None;
    }
    let data: EventData = match serde_json::from_slice(&packet.data) {
        Ok(data) => data,
        Err(e) => {
            debug!("Skipping event update: {}", e);
            return None;
        }
    };
    match data.event_type.as_str() {
        "ring" => Some(Notification::Ring),
        "smartDetectZone" => Some(Notification::SmartDetect {
            event_id: packet.action.id.clone(),
            types: data.smart_detect_types,
        }),
        _ => None,
    }
}

/// Settings the event task needs from the service.
#[derive(Clone)]
pub struct EventSink {
    pub nvr: Arc<NvrClient>,
    pub client: Arc<dyn ChatClient>,
    pub room_id: String,
    pub thumbnail_delay: Duration,
}

impl EventSink {
    async fn send_notice_html(&self, body: &str) {
        let content =
            Reply::Html(HtmlMessage::new("m.notice", body, markdown_render(body))).to_content();
        if let Err(e) = self
            .client
            .send_message_event(&self.room_id, ROOM_MESSAGE, &content)
            .await
        {
            error!(room_id = %self.room_id, "Failed to send NVR notification: {}", e);
        }
    }

    pub async fn notify(&self, notification: Notification, token: &CancellationToken) {
        match notification {
            Notification::Ring => self.send_notice_html("<b>RING RING</b>").await,
            Notification::SmartDetect { event_id, types } => {
                self.send_notice_html(&format!("Detect: {}", types.join(", ")))
                    .await;

                // The NVR needs a moment before the thumbnail exists.
                let forward = async {
                    tokio::time::sleep(self.thumbnail_delay).await;
                    self.forward_thumbnail(&event_id).await;
                };
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        debug!(event_id = %event_id, "Feed stopped, dropping thumbnail");
                    }
                    _ = forward => {}
                }
            }
        }
    }

    async fn forward_thumbnail(&self, event_id: &str) {
        let image = match self.nvr.thumbnail(event_id).await {
            Ok(image) => image,
            Err(e) => {
                error!(room_id = %self.room_id, event_id = %event_id, "Could not get thumbnail: {}", e);
                return;
            }
        };

        let length = image.len() as u64;
        let uri = match self
            .client
            .upload_to_content_repo(image, "image/jpeg", length)
            .await
        {
            Ok(uri) => uri,
            Err(e) => {
                error!(room_id = %self.room_id, "Could not upload thumbnail: {}", e);
                return;
            }
        };

        let filename = format!("file{}.jpg", event_id);
        if let Err(e) = self.client.send_image(&self.room_id, &filename, &uri).await {
            error!(room_id = %self.room_id, "Failed to send thumbnail: {}", e);
        }
    }
}

/// Notifications in flight, run off the websocket loop but joined when the
/// feed stops.
struct Notifier {
    sink: EventSink,
    token: CancellationToken,
    tracker: TaskTracker,
}

impl Notifier {
    fn new(sink: EventSink, token: CancellationToken) -> Self {
        Self {
            sink,
            token,
            tracker: TaskTracker::new(),
        }
    }

    fn dispatch(&self, notification: Notification) {
        let sink = self.sink.clone();
        let token = self.token.clone();
        self.tracker
            .spawn(async move { sink.notify(notification, &token).await });
    }

    /// Wait for every dispatched notification to finish or observe the
    /// cancellation.
    async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Follow the update feed until cancelled, reconnecting with backoff.
/// Returns only after pending notifications have finished.
pub async fn run_event_stream(sink: EventSink, token: CancellationToken) {
    let notifier = Notifier::new(sink, token.clone());
    let mut backoff = INITIAL_BACKOFF;

    loop {
        match run_session(&notifier, &token, &mut backoff).await {
            Ok(()) if token.is_cancelled() => break,
            Ok(()) => info!("NVR update feed closed, reconnecting in {:?}", backoff),
            Err(e) => warn!("NVR update feed failed: {}, reconnecting in {:?}", e, backoff),
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }

    notifier.drain().await;
    info!("NVR update feed stopped");
}

async fn run_session(
    notifier: &Notifier,
    token: &CancellationToken,
    backoff: &mut Duration,
) -> Result<(), NvrError> {
    let sink = &notifier.sink;
    sink.nvr.authenticate().await?;
    let bootstrap = sink.nvr.bootstrap().await?;

    let mut request = sink
        .nvr
        .updates_url(&bootstrap.last_update_id)
        .into_client_request()?;
    if let Ok(cookie) = HeaderValue::from_str(&sink.nvr.cookie().await) {
        request.headers_mut().insert("Cookie", cookie);
    }

    let (mut ws, _) = tokio::select! {
        _ = token.cancelled() => return Ok(()),
        connected = connect_async(request) => connected?,
    };
    info!(room_id = %sink.room_id, "Connected to NVR update feed");
    *backoff = INITIAL_BACKOFF;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                let _ = ws.close(None).await;
                return Ok(());
            }
            frame = ws.next() => match frame {
                Some(Ok(WsMessage::Binary(data))) => match UpdatePacket::decode(&data) {
                    Ok(packet) => {
                        if let Some(notification) = classify(&packet) {
                            notifier.dispatch(notification);
                        }
                    }
                    Err(e) => warn!("Skipping update packet: {}", e),
                },
                Some(Ok(WsMessage::Ping(data))) => ws.send(WsMessage::Pong(data)).await?,
                Some(Ok(WsMessage::Close(frame))) => {
                    info!(?frame, "NVR closed the update feed");
                    return Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(()),
            }
        }
    }
}
