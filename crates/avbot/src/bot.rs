//! Chat event loop: joins invited rooms and answers commands.

use crate::router::{CommandRouter, Dispatch};
use matrix_client::{ChatClient, RoomMessage, SyncItem, ROOM_MESSAGE};
use std::sync::Arc;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Drives one bot account.
pub struct Bot {
    client: Arc<dyn ChatClient>,
    router: Arc<CommandRouter>,
    auto_join: bool,
}

impl Bot {
    pub fn new(client: Arc<dyn ChatClient>, router: Arc<CommandRouter>, auto_join: bool) -> Self {
        Self {
            client,
            router,
            auto_join,
        }
    }

    /// Consume sync items until the stream ends or `shutdown` fires. Each
    /// message is handled on its own task.
    pub async fn run<S>(self: Arc<Self>, stream: S, shutdown: CancellationToken)
    where
        S: Stream<Item = SyncItem> + Send,
    {
        let mut stream = std::pin::pin!(stream);
        info!(
            user_id = %self.client.user_id(),
            trigger = %self.router.trigger(),
            "Listening for messages..."
        );

        loop {
            tokio::select! {
                item = stream.next() => {
                    let Some(item) = item else {
                        warn!("Sync stream ended");
                        break;
                    };
                    let bot = self.clone();
                    tokio::spawn(async move { bot.handle(item).await });
                }
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }
    }

    /// Handle a single sync item.
    pub async fn handle(&self, item: SyncItem) {
        match item {
            SyncItem::Invite(room_id) => self.on_invite(&room_id).await,
            SyncItem::Message(message) => self.on_message(&message).await,
        }
    }

    async fn on_invite(&self, room_id: &str) {
        if !self.auto_join {
            debug!(%room_id, "Ignoring invite");
            return;
        }
        match self.client.join_room(room_id).await {
            Ok(()) => info!(%room_id, "Joined room"),
            Err(e) => error!(%room_id, "Failed to join room: {}", e),
        }
    }

    async fn on_message(&self, message: &RoomMessage) {
        let dispatch = self
            .router
            .dispatch(
                &message.text,
                &message.room_id,
                &message.sender,
                self.client.user_id(),
            )
            .await;

        let Dispatch::Handled(Some(reply)) = dispatch else {
            return;
        };

        if let Err(e) = self
            .client
            .send_message_event(&message.room_id, ROOM_MESSAGE, &reply.to_content())
            .await
        {
            error!(room_id = %message.room_id, "Failed to send reply: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ServiceCatalog;
    use crate::clients::ClientSet;
    use crate::test_support::{mock_client, paths, registry_with_test_services, save_record_with, MockChat};
    use matrix_client::MatrixError;
    use serde_json::json;
    use service_store::MemoryStore;

    const BOT: &str = "@avbot:example.org";
    const ROOM: &str = "!room:example.org";

    fn message(text: &str) -> SyncItem {
        SyncItem::Message(RoomMessage {
            room_id: ROOM.into(),
            sender: "@alice:example.org".into(),
            text: text.into(),
            event_id: "$1".into(),
            timestamp: 0,
        })
    }

    async fn bot_with(client: MockChat, auto_join: bool) -> Bot {
        let store = Arc::new(MemoryStore::new());
        save_record_with(&store, "svc", "cmd", BOT, paths(&[&["ping"]])).await;

        let client: Arc<dyn ChatClient> = Arc::new(client);
        let clients = ClientSet::new();
        clients.insert(client.clone());

        let catalog = ServiceCatalog::new(store, Arc::new(registry_with_test_services()));
        let router = Arc::new(CommandRouter::new(catalog, clients, "!"));
        Bot::new(client, router, auto_join)
    }

    #[tokio::test]
    async fn test_command_reply_is_sent_to_room() {
        let mut client = mock_client(BOT);
        client
            .expect_send_message_event()
            .withf(|room, event_type, content| {
                room == ROOM
                    && event_type == ROOM_MESSAGE
                    && content == &json!({ "msgtype": "m.notice", "body": "svc:ping:now" })
            })
            .times(1)
            .returning(|_, _, _| Ok("$ev".into()));

        let bot = bot_with(client, true).await;
        bot.handle(message("!ping now")).await;
    }

    #[tokio::test]
    async fn test_unmatched_message_sends_nothing() {
        // No send expectation: any send would panic.
        let bot = bot_with(mock_client(BOT), true).await;
        bot.handle(message("hello there")).await;
        bot.handle(message("!unknown")).await;
    }

    #[tokio::test]
    async fn test_invite_joins_when_enabled() {
        let mut client = mock_client(BOT);
        client
            .expect_join_room()
            .withf(|room| room == "!new:example.org")
            .times(1)
            .returning(|_| Ok(()));

        let bot = bot_with(client, true).await;
        bot.handle(SyncItem::Invite("!new:example.org".into())).await;
    }

    #[tokio::test]
    async fn test_invite_ignored_when_disabled() {
        let bot = bot_with(mock_client(BOT), false).await;
        bot.handle(SyncItem::Invite("!new:example.org".into())).await;
    }

    #[tokio::test]
    async fn test_send_failure_is_logged() {
        let mut client = mock_client(BOT);
        client
            .expect_send_message_event()
            .times(1)
            .returning(|_, _, _| Err(MatrixError::Unauthorized));

        let bot = bot_with(client, true).await;
        bot.handle(message("!ping")).await;
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let bot = Arc::new(bot_with(mock_client(BOT), true).await);
        let token = CancellationToken::new();
        token.cancel();

        bot.run(futures::stream::pending::<SyncItem>(), token).await;
    }

    #[tokio::test]
    async fn test_run_stops_when_stream_ends() {
        let bot = Arc::new(bot_with(mock_client(BOT), true).await);
        bot.run(tokio_stream::iter(Vec::<SyncItem>::new()), CancellationToken::new())
            .await;
    }
}
