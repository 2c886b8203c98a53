//! Echoes `!echo` arguments back as a notice.

use crate::service::{Command, CommandRequest, Reply, Service, ServiceMeta};
use async_trait::async_trait;
use matrix_client::ChatClient;
use std::sync::Arc;

pub const SERVICE_TYPE: &str = "echo";

const WIDGET_URL: &str = "https://www.aventer.biz/";

/// Has no configuration.
pub struct EchoService {
    meta: ServiceMeta,
}

impl EchoService {
    pub fn new(meta: ServiceMeta) -> Self {
        Self { meta }
    }
}

#[async_trait]
impl Service for EchoService {
    fn meta(&self) -> &ServiceMeta {
        &self.meta
    }

    fn load_config(&mut self, _config: serde_json::Value) -> Result<(), serde_json::Error> {
        Ok(())
    }

    fn config(&self) -> Result<serde_json::Value, serde_json::Error> {
        Ok(serde_json::json!({}))
    }

    fn commands(self: Arc<Self>, _client: Arc<dyn ChatClient>) -> Vec<Command> {
        vec![
            Command::new(&["echo"], |req: CommandRequest| async move {
                Ok(Some(Reply::notice(req.args.join(" "))))
            }),
            Command::new(&["echo", "widget"], |_req: CommandRequest| async move {
                Ok(Some(Reply::notice(format!("Widget AVENTER: {}", WIDGET_URL))))
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::find_command;
    use crate::test_support::mock_client;

    #[tokio::test]
    async fn test_echo_joins_args() {
        let service = Arc::new(EchoService::new(ServiceMeta::new("e", SERVICE_TYPE, "@b:x", "")));
        let commands = service.commands(Arc::new(mock_client("@b:x")));

        let cmd = find_command(&commands, &["echo", "hello", "world"]).unwrap();
        let reply = cmd
            .invoke(CommandRequest {
                room_id: "!r:x".into(),
                user_id: "@u:x".into(),
                args: vec!["hello".into(), "world".into()],
            })
            .await
            .unwrap();
        assert_eq!(reply, Some(Reply::notice("hello world")));

        let widget = find_command(&commands, &["echo", "widget"]).unwrap();
        assert_eq!(widget.path, vec!["echo", "widget"]);
    }
}
