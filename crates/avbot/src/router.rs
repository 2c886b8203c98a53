//! Chat command routing.
//!
//! A message `!a b c d` is split into tokens and matched against the command
//! paths of every service visible to the sender. The longest path whose
//! segments equal the leading tokens wins; the remaining tokens become the
//! handler's arguments.

use crate::catalog::ServiceCatalog;
use crate::clients::ClientSet;
use crate::service::{Command, CommandRequest, Reply};
use tracing::{debug, error, warn};

/// Default trigger prefix.
pub const DEFAULT_TRIGGER: &str = "!";

/// Outcome of routing one message.
#[derive(Debug, PartialEq)]
pub enum Dispatch {
    /// Not a command, or no command path matched.
    NotFound,
    /// A handler ran. `None` means it produced no reply.
    Handled(Option<Reply>),
}

/// Pick the command with the longest path matching the leading `tokens`.
///
/// Segments compare case-sensitively and only as whole tokens. When two
/// commands declare the same path the later one wins.
pub fn find_command<'a>(commands: &'a [Command], tokens: &[&str]) -> Option<&'a Command> {
    let mut best: Option<&Command> = None;

    for command in commands {
        let path = &command.path;
        if path.is_empty() || path.len() > tokens.len() {
            continue;
        }
        if !path.iter().zip(tokens).all(|(seg, tok)| seg.as_str() == *tok) {
            continue;
        }
        match best {
            Some(current) if current.path.len() > path.len() => {}
            Some(current) if current.path == *path => {
                warn!("Command path {:?} is declared more than once", path);
                best = Some(command);
            }
            _ => best = Some(command),
        }
    }

    best
}

/// Routes chat messages to service commands.
#[derive(Clone)]
pub struct CommandRouter {
    catalog: ServiceCatalog,
    clients: ClientSet,
    trigger: String,
}

impl CommandRouter {
    pub fn new(catalog: ServiceCatalog, clients: ClientSet, trigger: impl Into<String>) -> Self {
        Self {
            catalog,
            clients,
            trigger: trigger.into(),
        }
    }

    pub fn trigger(&self) -> &str {
        &self.trigger
    }

    /// Route `text` sent by `user_id` in `room_id` to the bot account
    /// `bot_user_id`. Handler errors are turned into notices.
    pub async fn dispatch(&self, text: &str, room_id: &str, user_id: &str, bot_user_id: &str) -> Dispatch {
        let Some(stripped) = text.trim_start().strip_prefix(self.trigger.as_str()) else {
            return Dispatch::NotFound;
        };
        let tokens: Vec<&str> = stripped.split_whitespace().collect();
        if tokens.is_empty() {
            return Dispatch::NotFound;
        }

        let Some(client) = self.clients.get(bot_user_id) else {
            warn!(user_id = %bot_user_id, "No chat client for bot account");
            return Dispatch::NotFound;
        };

        let services = match self.catalog.load_all().await {
            Ok(services) => services,
            Err(e) => {
                error!("Failed to load services: {}", e);
                return Dispatch::NotFound;
            }
        };

        let commands: Vec<Command> = services
            .into_iter()
            .filter(|s| s.service_user_id() == bot_user_id)
            .filter(|s| s.access().allows(room_id, user_id))
            .flat_map(|s| s.commands(client.clone()))
            .collect();

        let Some(command) = find_command(&commands, &tokens) else {
            debug!(room_id = %room_id, "No command matches {:?}", tokens);
            return Dispatch::NotFound;
        };

        let args = tokens[command.path.len()..]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let request = CommandRequest {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            args,
        };

        debug!(room_id = %room_id, user_id = %user_id, "Running command {:?}", command.path);
        match command.invoke(request).await {
            Ok(reply) => Dispatch::Handled(reply),
            Err(e) => {
                warn!(room_id = %room_id, "Command {:?} failed: {}", command.path, e);
                Dispatch::Handled(Some(Reply::notice(format!(
                    "Failed to handle command: {}",
                    e
                ))))
            }
        }
    }
}
