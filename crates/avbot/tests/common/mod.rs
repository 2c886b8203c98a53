//! Common test utilities for integration tests.

#![allow(dead_code)]

use avbot::api::{create_router, AppState};
use avbot::services::{http_client, register_all, DEFAULT_HTTP_TIMEOUT};
use avbot::{ClientSet, CommandRouter, LifecycleManager, ServiceCatalog, ServiceRegistry, WebhookDispatcher};
use axum::Router;
use matrix_client::{ChatClient, MatrixClient};
use service_store::MemoryStore;
use std::sync::Arc;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const BOT: &str = "@avbot:example.org";
pub const ROOM: &str = "!room:example.org";
pub const BASE_URL: &str = "http://localhost:4050";

/// A fully wired bot talking to a mock homeserver.
pub struct TestApp {
    pub homeserver: MockServer,
    pub client: Arc<dyn ChatClient>,
    pub store: Arc<MemoryStore>,
    pub lifecycle: Arc<LifecycleManager>,
    pub router: Arc<CommandRouter>,
    pub app: Router,
}

impl TestApp {
    /// Bodies of every message event sent to the homeserver.
    pub async fn sent_messages(&self) -> Vec<(String, serde_json::Value)> {
        self.homeserver
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|req| req.url.path().contains("/send/"))
            .map(|req| {
                let body = serde_json::from_slice(&req.body).unwrap();
                (req.url.path().to_string(), body)
            })
            .collect()
    }
}

/// Start a mock homeserver that accepts joins and message sends.
pub async fn mock_homeserver() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/_matrix/client/v3/join/.+$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "room_id": ROOM
        })))
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path_regex(r"^/_matrix/client/v3/rooms/.+/send/m\.room\.message/.+$"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "event_id": "$ev" })),
        )
        .mount(&server)
        .await;

    server
}

pub async fn spawn_app() -> TestApp {
    let homeserver = mock_homeserver().await;
    let client: Arc<dyn ChatClient> =
        Arc::new(MatrixClient::new(homeserver.uri(), BOT, "test-token").unwrap());

    let mut builder = ServiceRegistry::builder();
    register_all(&mut builder, http_client(DEFAULT_HTTP_TIMEOUT).unwrap()).unwrap();

    let store = Arc::new(MemoryStore::new());
    let clients = ClientSet::new();
    clients.insert(client.clone());

    let catalog = ServiceCatalog::new(store.clone(), Arc::new(builder.build()));
    let lifecycle = Arc::new(LifecycleManager::new(catalog.clone(), clients.clone(), BASE_URL));
    let router = Arc::new(CommandRouter::new(catalog.clone(), clients.clone(), "!"));
    let app = create_router(AppState::new(
        lifecycle.clone(),
        WebhookDispatcher::new(catalog, clients),
    ));

    TestApp {
        homeserver,
        client,
        store,
        lifecycle,
        router,
        app,
    }
}
