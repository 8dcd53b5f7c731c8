#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use arena_sync::config::ServerConfig;
use arena_sync::shutdown::{shutdown_channel, ShutdownTx};
use arena_sync::RunningServer;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use session::{Session, SessionId};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const WAIT: Duration = Duration::from_secs(3);

pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: ShutdownTx,
    pub server: RunningServer,
}

pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.net.addr = "127.0.0.1:0".to_string();
    for player in ["h", "p", "q", "p2"] {
        config
            .auth
            .tokens
            .insert(format!("tok-{player}"), player.to_string());
    }
    config
}

pub async fn start_server() -> TestServer {
    start_with(test_config()).await
}

pub async fn start_with(config: ServerConfig) -> TestServer {
    let (shutdown, rx) = shutdown_channel();
    let server = arena_sync::start(&config, rx).await.unwrap();
    TestServer {
        addr: server.local_addr,
        shutdown,
        server,
    }
}

impl TestServer {
    /// Current state of a loaded session.
    pub async fn session(&self, id: SessionId) -> Session {
        self.server
            .controller
            .directory()
            .get(id)
            .expect("session loaded")
            .snapshot()
            .await
            .unwrap()
    }

    pub async fn http(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (u16, Value) {
        http(self.addr, method, path, token, body).await
    }

    /// Create a session over HTTP and return its id.
    pub async fn create_session(&self, token: &str, body: Value) -> SessionId {
        let (status, json) = self.http("POST", "/sessions", Some(token), Some(body)).await;
        assert_eq!(status, 201, "create failed: {json}");
        json["id"].as_str().unwrap().parse().unwrap()
    }

    pub async fn join(&self, token: &str, id: SessionId, body: Value) -> (u16, Value) {
        self.http("POST", &format!("/sessions/{id}/join"), Some(token), Some(body))
            .await
    }

    pub async fn connect(&self, id: SessionId, token: &str) -> Ws {
        connect_raw(self.addr, &format!("/ws/{id}?token={token}")).await
    }

    /// Connect and consume the welcome message.
    pub async fn connect_joined(&self, id: SessionId, token: &str) -> (Ws, Value) {
        let mut ws = self.connect(id, token).await;
        let welcome = recv_json(&mut ws).await;
        assert_eq!(welcome["type"], "welcome", "unexpected first message: {welcome}");
        (ws, welcome)
    }
}

/// Minimal HTTP/1.1 client; the server closes after one response.
pub async fn http(
    addr: SocketAddr,
    method: &str,
    path: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (u16, Value) {
    let body = body.map(|b| b.to_string()).unwrap_or_default();
    let auth = token
        .map(|t| format!("Authorization: Bearer {t}\r\n"))
        .unwrap_or_default();
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\
         Content-Type: application/json\r\nContent-Length: {}\r\n{auth}\r\n{body}",
        body.len()
    );

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut raw = Vec::new();
    tokio::time::timeout(WAIT, stream.read_to_end(&mut raw))
        .await
        .expect("http response timed out")
        .unwrap();

    let text = String::from_utf8(raw).unwrap();
    let (head, payload) = text.split_once("\r\n\r\n").unwrap_or((&text, ""));
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap();
    let json = if payload.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(payload).unwrap()
    };
    (status, json)
}

pub async fn connect_raw(addr: SocketAddr, path: &str) -> Ws {
    let url = format!("ws://{addr}{path}");
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    ws
}

pub async fn send_json(ws: &mut Ws, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

/// Next text frame as JSON, skipping control frames.
pub async fn recv_json(ws: &mut Ws) -> Value {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for message")
            .expect("stream ended")
            .unwrap();
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Close(frame) => panic!("unexpected close: {frame:?}"),
            _ => continue,
        }
    }
}

/// Skip messages until one of the given type arrives.
pub async fn recv_type(ws: &mut Ws, kind: &str) -> Value {
    loop {
        let msg = recv_json(ws).await;
        if msg["type"] == kind {
            return msg;
        }
    }
}

/// Read until the server closes; returns the close code.
pub async fn expect_close(ws: &mut Ws) -> u16 {
    loop {
        let next = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for close");
        match next {
            Some(Ok(Message::Close(Some(frame)))) => return u16::from(frame.code),
            Some(Ok(Message::Close(None))) => return 1005,
            Some(Ok(_)) => continue,
            Some(Err(e)) => panic!("connection failed before close frame: {e}"),
            None => panic!("stream ended without close frame"),
        }
    }
}

/// Assert no text frame arrives within `ms`.
pub async fn assert_silent(ws: &mut Ws, ms: u64) {
    let deadline = tokio::time::sleep(Duration::from_millis(ms));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => return,
            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => panic!("unexpected message: {text}"),
                Some(Ok(_)) => continue,
                other => panic!("connection ended: {other:?}"),
            }
        }
    }
}
