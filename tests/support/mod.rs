// Shared helpers for booting the server and talking to it in integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use arena_server::game::GameRules;
use arena_server::Config;
use futures::StreamExt;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lobby id the first seeded lobby is pinned to
pub const DEFAULT_LOBBY_ID: &str = arena_server::config::DEFAULT_LOBBY_ID;

// Short ticks and a two-player cap so games start as soon as two players join.
pub fn test_config() -> Config {
    Config {
        rules: GameRules {
            tick_length: Duration::from_millis(500),
            max_players: 2,
            start_grace: Duration::from_secs(1),
            ..GameRules::default()
        },
        ..Config::default()
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
}

impl TestServer {
    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }
}

// Bind an ephemeral port and serve on the current test runtime. The listener
// is bound before this returns, so requests queue until the router is ready.
pub async fn spawn_server(config: Config) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral test port");
    let addr = listener.local_addr().expect("get local addr");

    tokio::spawn(async move {
        arena_server::run(listener, config, std::future::pending())
            .await
            .expect("server failed");
    });

    TestServer { addr }
}

// Like `spawn_server`, but firing the returned sender stops the server; the
// join handle resolves once `run` has returned.
pub async fn spawn_stoppable_server(
    config: Config,
) -> (TestServer, oneshot::Sender<()>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral test port");
    let addr = listener.local_addr().expect("get local addr");
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let shutdown = async {
            let _ = stop_rx.await;
        };
        arena_server::run(listener, config, shutdown)
            .await
            .expect("server failed");
    });

    (TestServer { addr }, stop_tx, server)
}

pub async fn connect(server: &TestServer, lobby_id: &str, query: &str) -> WsStream {
    let url = server.ws(&format!("/lobby/{lobby_id}?{query}"));
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("websocket handshake");
    ws
}

// Next text frame as JSON, skipping control frames.
pub async fn next_json(ws: &mut WsStream) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("websocket error");
        match message {
            Message::Text(text) => return serde_json::from_str(&text).expect("valid json"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

// Skip data frames until the server closes; returns its close code.
pub async fn close_code(ws: &mut WsStream) -> Option<CloseCode> {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a close frame")?;
        match message {
            Ok(Message::Close(frame)) => return frame.map(|f| f.code),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

// Read snapshots until one for `tick` arrives.
pub async fn snapshot_for_tick(ws: &mut WsStream, tick: u64) -> Value {
    loop {
        let value = next_json(ws).await;
        if value["tick"] == tick.to_string().as_str() {
            return value;
        }
    }
}

pub fn find_player<'a>(snapshot: &'a Value, player_id: &str) -> &'a Value {
    snapshot["players"]
        .as_array()
        .expect("players array")
        .iter()
        .find(|p| p["id"] == player_id)
        .expect("player in snapshot")
}
