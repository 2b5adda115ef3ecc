//! Shared helpers for relay integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use impress_collab::{CollabEvent, Role, ServerMessage, UserPresence};
use impress_relay::{serve_listener, RelayConfig, RelayState};

pub type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Start a relay on an ephemeral port
pub async fn start_relay(config: RelayConfig) -> (SocketAddr, Arc<RelayState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(RelayState::new(config));
    tokio::spawn(serve_listener(
        listener,
        Arc::clone(&state),
        std::future::pending(),
    ));
    (addr, state)
}

pub fn ws_url(addr: SocketAddr, session: &str, user: &str) -> String {
    format!("ws://{}/sessions/{}/ws?userId={}", addr, session, user)
}

/// Connect a raw participant and consume its welcome frame
pub async fn join(addr: SocketAddr, session: &str, user: &str) -> (Socket, ServerMessage) {
    let (mut ws, _) = tokio_tungstenite::connect_async(ws_url(addr, session, user))
        .await
        .unwrap();
    let welcome = next_frame(&mut ws).await;
    assert!(
        matches!(welcome, ServerMessage::Welcome { .. }),
        "expected welcome, got {:?}",
        welcome
    );
    (ws, welcome)
}

pub async fn next_frame(ws: &mut Socket) -> ServerMessage {
    loop {
        let message = tokio::time::timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = message {
            return ServerMessage::from_json(text.as_str()).unwrap();
        }
    }
}

/// Next relayed event, panicking on anything else
pub async fn next_event(ws: &mut Socket) -> (u64, CollabEvent) {
    match next_frame(ws).await {
        ServerMessage::Event(relayed) => (relayed.sequence, relayed.event),
        other => panic!("expected event, got {:?}", other),
    }
}

pub async fn send(ws: &mut Socket, event: &CollabEvent) {
    ws.send(Message::text(event.to_json().unwrap())).await.unwrap();
}

pub fn presence(user: &str, role: Role) -> CollabEvent {
    CollabEvent::Presence(UserPresence::new(user, user.to_uppercase(), role))
}
