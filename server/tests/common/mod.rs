//! Shared harness for the integration tests: a live server on a random port,
//! seeded users, bearer tokens and a small WebSocket client.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use courier_server::auth::Claims;
use courier_server::config::{Config, StorageConfig};
use courier_server::db::models::{DisplayPicture, User};
use courier_server::state::AppState;
use courier_server::store::NewUser;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub const JWT_SECRET: &str = "integration-test-secret";

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsWrite = SplitSink<WsStream, Message>;
pub type WsRead = SplitStream<WsStream>;

pub struct TestServer {
    pub base_url: String,
    pub addr: SocketAddr,
    pub state: AppState,
    pub http: reqwest::Client,
    _data_dir: tempfile::TempDir,
}

/// Start the server on a random port backed by a fresh data directory.
pub async fn start_test_server() -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let storage = StorageConfig::under(&data_dir);
    for dir in [&storage.images_dir, &storage.files_dir, &storage.upload_dir] {
        std::fs::create_dir_all(dir).expect("Failed to create storage dir");
    }

    let config = Config {
        data_dir: data_dir.clone(),
        jwt_secret: JWT_SECRET.to_string(),
        storage: Some(storage),
        ..Config::default()
    };

    let db = courier_server::db::init_db(&data_dir).expect("Failed to init DB");
    let state = AppState::new(db, &config);
    let app = courier_server::routes::build_router(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        base_url: format!("http://{}", addr),
        addr,
        state,
        http: reqwest::Client::new(),
        _data_dir: tmp_dir,
    }
}

impl TestServer {
    /// Insert a user directly through the store.
    pub async fn seed_user(&self, name: &str) -> User {
        self.state
            .store
            .create_user(NewUser {
                name: name.to_string(),
                email: format!("{}@example.com", name.to_lowercase()),
                password_hash: "not-a-real-hash".to_string(),
                profile_pic: DisplayPicture::default_with_url("/media/images/default-user.png"),
            })
            .await
            .expect("Failed to seed user")
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Create a group through the REST API and return its JSON view.
    pub async fn create_group(&self, admin: &User, name: &str, others: &[&User]) -> Value {
        let ids: Vec<&str> = others.iter().map(|u| u.id.as_str()).collect();
        let form = reqwest::multipart::Form::new()
            .text("chatName", name.to_string())
            .text("users", serde_json::to_string(&ids).unwrap());
        let resp = self
            .http
            .post(self.url("/api/chat/group"))
            .bearer_auth(token_for(&admin.id))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201, "group creation failed");
        resp.json().await.unwrap()
    }

    /// Send a text message through the REST API and return its JSON view.
    pub async fn send_text(&self, sender: &User, chat_id: &str, content: &str) -> Value {
        let form = reqwest::multipart::Form::new()
            .text("chatId", chat_id.to_string())
            .text("content", content.to_string());
        let resp = self
            .http
            .post(self.url("/api/message"))
            .bearer_auth(token_for(&sender.id))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201, "message send failed");
        resp.json().await.unwrap()
    }

    /// Socket URL, with `?token=` when one is given.
    pub fn ws_url(&self, token: Option<&str>) -> String {
        match token {
            Some(token) => format!("ws://{}/ws?token={}", self.addr, token),
            None => format!("ws://{}/ws", self.addr),
        }
    }

    /// Open a socket authenticated as `user` without binding a session.
    pub async fn open_socket(&self, user: &User) -> (WsWrite, WsRead) {
        let (ws, _) = tokio_tungstenite::connect_async(self.ws_url(Some(&token_for(&user.id))))
            .await
            .expect("WS connect failed");
        ws.split()
    }

    /// Open a socket and bind it to `user` with init-session.
    pub async fn connect_as(&self, user: &User) -> (WsWrite, WsRead) {
        let (mut write, mut read) = self.open_socket(user).await;
        send_event(&mut write, "init-session", json!([user.id])).await;
        let ready = next_event(&mut read).await.expect("no session-ready");
        assert_eq!(ready["event"], "session-ready");
        (write, read)
    }
}

/// Mint a bearer token for `user_id`.
pub fn token_for(user_id: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now,
        exp: now + 3600,
    };
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

pub async fn send_event(write: &mut WsWrite, event: &str, args: Value) {
    let frame = json!({ "event": event, "args": args }).to_string();
    write.send(Message::Text(frame.into())).await.unwrap();
}

/// Next text frame as JSON, skipping control frames. `None` on timeout or close.
pub async fn next_event(read: &mut WsRead) -> Option<Value> {
    loop {
        match tokio::time::timeout(Duration::from_secs(2), read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                return Some(serde_json::from_str(text.as_str()).unwrap());
            }
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            _ => return None,
        }
    }
}

/// Assert no text frame arrives within a short window.
pub async fn expect_silence(read: &mut WsRead) {
    match tokio::time::timeout(Duration::from_millis(300), read.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => panic!("unexpected frame: {}", text.as_str()),
        _ => {}
    }
}
