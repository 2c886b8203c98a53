//! End-to-end tests: services configured through the lifecycle manager,
//! driven by chat commands and webhooks against a mock homeserver.

mod common;

use avbot::bot::Bot;
use avbot::webhook::{encode_endpoint, HOOKS_PATH};
use avbot::{ConfigureRequest, Dispatch, Reply, ServiceError};
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::{spawn_app, TestApp, BOT, ROOM};
use matrix_client::{RoomMessage, SyncItem};
use serde_json::json;
use service_store::ServiceStore;
use tower::ServiceExt;

async fn configure(app: &TestApp, service_type: &str, id: &str, config: serde_json::Value) -> Result<avbot::ConfigureOutcome, ServiceError> {
    app.lifecycle
        .configure(ConfigureRequest {
            service_type: service_type.into(),
            service_id: id.into(),
            service_user_id: BOT.into(),
            config,
        })
        .await
}

async fn post_hook(app: &TestApp, service_id: &str, payload: serde_json::Value) -> StatusCode {
    let uri = format!("{}/{}", HOOKS_PATH, encode_endpoint(service_id));
    app.app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
        .status()
}

fn push(repo: &str) -> serde_json::Value {
    json!({
        "ref": "refs/heads/main",
        "compare_url": "https://git.example.org/compare",
        "commits": [{
            "id": "0123456789abcdef",
            "message": "Fix the flux capacitor",
            "url": "https://git.example.org/commit/0123456",
            "author": { "name": "alice" }
        }],
        "repository": { "full_name": repo }
    })
}

fn gitea_config() -> serde_json::Value {
    json!({ "rooms": { ROOM: { "repos": { "owner/repo": {} } } } })
}

#[tokio::test]
async fn test_gitea_push_is_relayed_to_bound_room() {
    let app = spawn_app().await;
    configure(&app, "gitea", "gitea1", gitea_config()).await.unwrap();

    let status = post_hook(&app, "gitea1", push("owner/repo")).await;
    assert_eq!(status, StatusCode::OK);

    let sent = app.sent_messages().await;
    assert_eq!(sent.len(), 1);
    let (path, body) = &sent[0];
    assert!(path.contains("/rooms/%21room%3Aexample.org/send/"));
    let text = body["body"].as_str().unwrap();
    assert!(text.contains("alice"));
    assert!(text.contains("Fix the flux capacitor"));
    assert_eq!(body["format"], "org.matrix.custom.html");
}

#[tokio::test]
async fn test_gitea_push_for_unbound_repo_sends_nothing() {
    let app = spawn_app().await;
    configure(&app, "gitea", "gitea1", gitea_config()).await.unwrap();

    let status = post_hook(&app, "gitea1", push("someone/else")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(app.sent_messages().await.is_empty());
}

#[tokio::test]
async fn test_webhook_for_unknown_service_is_not_found() {
    let app = spawn_app().await;
    let status = post_hook(&app, "nobody", push("owner/repo")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_webhook_to_service_without_webhooks_is_not_found() {
    let app = spawn_app().await;
    configure(&app, "echo", "echo1", json!({})).await.unwrap();

    let status = post_hook(&app, "echo1", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_echo_command() {
    let app = spawn_app().await;
    configure(&app, "echo", "echo1", json!({})).await.unwrap();

    let result = app
        .router
        .dispatch("!echo hello world", ROOM, "@alice:example.org", BOT)
        .await;
    assert_eq!(result, Dispatch::Handled(Some(Reply::notice("hello world"))));

    let widget = app
        .router
        .dispatch("!echo widget", ROOM, "@alice:example.org", BOT)
        .await;
    assert_eq!(
        widget,
        Dispatch::Handled(Some(Reply::notice("Widget AVENTER: https://www.aventer.biz/")))
    );
}

#[tokio::test]
async fn test_unregistered_command_is_not_found() {
    let app = spawn_app().await;
    configure(&app, "echo", "echo1", json!({})).await.unwrap();

    let result = app
        .router
        .dispatch("!aws instance", ROOM, "@alice:example.org", BOT)
        .await;
    assert_eq!(result, Dispatch::NotFound);
}

#[tokio::test]
async fn test_failed_register_leaves_store_untouched() {
    let app = spawn_app().await;

    let result = configure(&app, "unifi_protect", "nvr", json!({ "event_stream": true })).await;
    assert!(matches!(result, Err(ServiceError::RegisterFailed(_))));
    assert!(app.store.load("nvr").await.unwrap().is_none());
}

#[tokio::test]
async fn test_gitea_without_bindings_deletes_itself() {
    let app = spawn_app().await;
    configure(&app, "gitea", "gitea1", gitea_config()).await.unwrap();

    let outcome = configure(&app, "gitea", "gitea1", json!({ "rooms": {} })).await.unwrap();
    assert!(outcome.removed);
    assert!(outcome.old_config.is_some());
    assert!(app.store.load("gitea1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_bot_replies_to_command() {
    let app = spawn_app().await;
    configure(&app, "echo", "echo1", json!({})).await.unwrap();

    let bot = Bot::new(app.client.clone(), app.router.clone(), true);
    bot.handle(SyncItem::Message(RoomMessage {
        room_id: ROOM.into(),
        sender: "@alice:example.org".into(),
        text: "!echo ping".into(),
        event_id: "$1".into(),
        timestamp: 0,
    }))
    .await;

    let sent = app.sent_messages().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, json!({ "msgtype": "m.notice", "body": "ping" }));
}
