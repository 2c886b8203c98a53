//! Sync receiver with long polling.

use crate::client::{ChatClient, MatrixClient};
use crate::types::*;
use std::time::Duration;
use tokio::time::sleep;
use tokio_stream::Stream;
use tracing::{debug, error, info};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const PREVIEW_CHARS: usize = 50;

/// Receiver that long-polls `/sync` and yields new room activity.
///
/// The timeline of the very first sync is treated as history and skipped, so
/// commands sent while the bot was offline are not replayed.
pub struct SyncReceiver {
    client: MatrixClient,
    timeout: Duration,
}

impl SyncReceiver {
    /// Create a new sync receiver.
    pub fn new(client: MatrixClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Start receiving as an async stream.
    pub fn stream(self) -> impl Stream<Item = SyncItem> {
        async_stream::stream! {
            let mut since: Option<String> = None;
            let mut backoff = INITIAL_BACKOFF;

            loop {
                let response = match self.client.sync(since.as_deref(), self.timeout).await {
                    Ok(response) => {
                        backoff = INITIAL_BACKOFF;
                        response
                    }
                    Err(e) => {
                        error!("Sync error: {}", e);
                        sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                        continue;
                    }
                };

                let initial = since.is_none();
                since = Some(response.next_batch.clone());

                for item in extract_items(self.client.user_id(), &response) {
                    match &item {
                        SyncItem::Message(_) if initial => continue,
                        SyncItem::Message(msg) => debug!(
                            "Received: {} from {} in {}",
                            preview(&msg.text),
                            msg.sender,
                            msg.room_id
                        ),
                        SyncItem::Invite(room_id) => info!("Invited to {}", room_id),
                    }
                    yield item;
                }
            }
        }
    }
}

/// First characters of a message body, cut on a character boundary.
fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

/// Pull invites and text messages not sent by `own_user_id` out of a sync
/// response. Rooms are visited in ID order.
pub fn extract_items(own_user_id: &str, response: &SyncResponse) -> Vec<SyncItem> {
    let mut items = Vec::new();

    let mut invites: Vec<&String> = response.rooms.invite.keys().collect();
    invites.sort();
    items.extend(invites.into_iter().map(|room_id| SyncItem::Invite(room_id.clone())));

    let mut joined: Vec<(&String, &JoinedRoom)> = response.rooms.join.iter().collect();
    joined.sort_by(|a, b| a.0.cmp(b.0));
    for (room_id, room) in joined {
        for event in &room.timeline.events {
            if event.sender == own_user_id {
                continue;
            }
            if let Some(msg) = RoomMessage::from_event(room_id, event) {
                items.push(SyncItem::Message(msg));
            }
        }
    }

    items
}
