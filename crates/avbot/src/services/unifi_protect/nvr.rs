//! HTTP session against a UniFi Protect NVR.

use reqwest::header::{HeaderMap, COOKIE, SET_COOKIE};
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite;
use tracing::{debug, instrument, warn};

const CSRF_HEADER: &str = "x-csrf-token";

/// Extra attempts after a failed thumbnail download.
const THUMBNAIL_RETRIES: usize = 3;

#[derive(Error, Debug)]
pub enum NvrError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("NVR rejected the credentials")]
    Unauthorized,

    #[error("NVR returned status {0}")]
    Status(u16),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Invalid update packet: {0}")]
    Packet(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Default, Clone)]
struct Session {
    cookie: String,
    csrf_token: String,
}

/// Subset of `/proxy/protect/api/bootstrap`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bootstrap {
    #[serde(default)]
    pub last_update_id: String,
}

pub struct NvrClient {
    http: reqwest::Client,
    base_url: String,
    ws_base_url: String,
    user: String,
    password: SecretString,
    session: RwLock<Session>,
}

impl NvrClient {
    pub fn new(
        http: reqwest::Client,
        host: &str,
        port: u16,
        secure: bool,
        user: impl Into<String>,
        password: SecretString,
    ) -> Self {
        let (scheme, ws_scheme) = if secure { ("https", "wss") } else { ("http", "ws") };
        Self {
            http,
            base_url: format!("{}://{}:{}", scheme, host, port),
            ws_base_url: format!("{}://{}:{}", ws_scheme, host, port),
            user: user.into(),
            password,
            session: RwLock::new(Session::default()),
        }
    }

    #[instrument(skip(self), fields(nvr = %self.base_url))]
    pub async fn authenticate(&self) -> Result<(), NvrError> {
        let body = serde_json::json!({
            "username": self.user,
            "password": self.password.expose_secret(),
        });

        let response = self
            .http
            .post(format!("{}/api/auth/login", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(NvrError::Unauthorized);
        }
        if !status.is_success() {
            return Err(NvrError::Status(status.as_u16()));
        }

        self.remember_session(response.headers()).await;
        debug!("Authenticated with NVR");
        Ok(())
    }

    async fn remember_session(&self, headers: &HeaderMap) {
        let mut session = self.session.write().await;
        if let Some(csrf) = headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok()) {
            session.csrf_token = csrf.to_string();
        }
        let cookies: Vec<&str> = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .collect();
        if !cookies.is_empty() {
            session.cookie = cookies.join("; ");
        }
    }

    /// Cookie header for the current session.
    pub async fn cookie(&self) -> String {
        self.session.read().await.cookie.clone()
    }

    async fn request_once(&self, method: Method, path: &str) -> Result<reqwest::Response, NvrError> {
        let session = self.session.read().await.clone();
        let response = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .header(COOKIE, session.cookie)
            .header(CSRF_HEADER, session.csrf_token)
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED => Err(NvrError::Unauthorized),
            status if !status.is_success() => Err(NvrError::Status(status.as_u16())),
            _ => {
                self.remember_session(response.headers()).await;
                Ok(response)
            }
        }
    }

    /// Send a request, logging in again once if the session expired.
    async fn request(&self, method: Method, path: &str) -> Result<reqwest::Response, NvrError> {
        match self.request_once(method.clone(), path).await {
            Err(NvrError::Unauthorized) => {
                self.authenticate().await?;
                self.request_once(method, path).await
            }
            other => other,
        }
    }

    pub async fn bootstrap(&self) -> Result<Bootstrap, NvrError> {
        let response = self
            .request(Method::GET, "/proxy/protect/api/bootstrap")
            .await?;
        Ok(response.json().await?)
    }

    /// JPEG thumbnail of an event, as opaque bytes.
    pub async fn thumbnail(&self, event_id: &str) -> Result<Vec<u8>, NvrError> {
        let path = format!("/proxy/protect/api/events/{}/thumbnail", event_id);
        let mut attempt = 0;
        loop {
            match self.request(Method::GET, &path).await {
                Ok(response) => return Ok(response.bytes().await?.to_vec()),
                Err(e) if attempt < THUMBNAIL_RETRIES => {
                    attempt += 1;
                    warn!(event_id = %event_id, "Thumbnail fetch failed (attempt {}): {}", attempt, e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// WebSocket URL for the update feed.
    pub fn updates_url(&self, last_update_id: &str) -> String {
        format!(
            "{}/proxy/protect/ws/updates?lastUpdateId={}",
            self.ws_base_url,
            urlencoding::encode(last_update_id)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> NvrClient {
        let address = server.address();
        NvrClient::new(
            reqwest::Client::new(),
            &address.ip().to_string(),
            address.port(),
            false,
            "admin",
            SecretString::new("pw".into()),
        )
    }

    async fn mount_login(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "TOKEN=abc; Path=/; HttpOnly")
                    .insert_header("x-csrf-token", "csrf1"),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_authenticate_keeps_session() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/proxy/protect/api/bootstrap"))
            .and(header("cookie", "TOKEN=abc"))
            .and(header("x-csrf-token", "csrf1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "lastUpdateId": "u-1" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let nvr = client(&server);
        nvr.authenticate().await.unwrap();
        assert_eq!(nvr.cookie().await, "TOKEN=abc");
        assert_eq!(nvr.bootstrap().await.unwrap().last_update_id, "u-1");
    }

    #[tokio::test]
    async fn test_authenticate_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = client(&server).authenticate().await;
        assert!(matches!(result, Err(NvrError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_thumbnail_reauthenticates() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/proxy/protect/api/events/ev1/thumbnail"))
            .and(header("cookie", "TOKEN=abc"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xff, 0xd8, 0xff]))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/proxy/protect/api/events/ev1/thumbnail"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        // No session yet: the first request is rejected, login, then retry.
        let bytes = client(&server).thumbnail("ev1").await.unwrap();
        assert_eq!(bytes, vec![0xff, 0xd8, 0xff]);
    }

    #[test]
    fn test_updates_url() {
        let nvr = NvrClient::new(
            reqwest::Client::new(),
            "nvr.local",
            443,
            true,
            "u",
            SecretString::new("p".into()),
        );
        assert_eq!(
            nvr.updates_url("a b"),
            "wss://nvr.local:443/proxy/protect/ws/updates?lastUpdateId=a%20b"
        );
    }
}
