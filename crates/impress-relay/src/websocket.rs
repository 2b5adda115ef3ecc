//! WebSocket handler for session participants
//!
//! Each connection receives a `welcome` snapshot, then every event the
//! session accepts except its own. Inbound text frames are bare
//! `CollabEvent` JSON.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use impress_collab::{CollabEvent, ServerMessage};

use crate::session::{Broadcast, Session};
use crate::RelayState;

/// Query parameters for the upgrade request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub user_id: String,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<RelayState>>,
    Path(session_id): Path<String>,
    Query(params): Query<ConnectParams>,
) -> Response {
    if params.user_id.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "userId must not be empty").into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id, params.user_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<RelayState>, session_id: String, user_id: String) {
    let connection_id = Uuid::new_v4();
    let (session, welcome, mut rx) = state.join(&session_id, &user_id).await;
    tracing::info!(session = %session_id, user = %user_id, %connection_id, "Participant connected");

    let (mut sink, mut stream) = socket.split();
    let mut forwarder = Forwarder::new(connection_id, &welcome);

    if send_frame(&mut sink, &welcome).await.is_ok() {
        loop {
            tokio::select! {
                inbound = stream.next() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_inbound(&session, connection_id, &user_id, text.as_str()) {
                            if send_frame(&mut sink, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(session = %session_id, user = %user_id, "WebSocket error: {}", e);
                        break;
                    }
                },
                outbound = rx.recv() => match forwarder.route(&session, &user_id, outbound) {
                    Outbound::Frame(frame) => {
                        if send_frame(&mut sink, &frame).await.is_err() {
                            break;
                        }
                    }
                    Outbound::Skip => {}
                    Outbound::Closed => break,
                },
            }
        }
    }

    state.disconnect(&session_id, &user_id).await;
    tracing::info!(session = %session_id, user = %user_id, %connection_id, "Participant disconnected");
}

/// What a connection is sent for one item off the session bus
#[derive(Debug)]
enum Outbound {
    Frame(ServerMessage),
    Skip,
    Closed,
}

/// Per-connection filter over the session bus. Drops the connection's own
/// events and anything already folded into the last welcome it was sent.
struct Forwarder {
    connection_id: Uuid,
    floor: u64,
}

impl Forwarder {
    fn new(connection_id: Uuid, welcome: &ServerMessage) -> Self {
        Self {
            connection_id,
            floor: welcome.sequence().unwrap_or(0),
        }
    }

    fn route(
        &mut self,
        session: &Session,
        user_id: &str,
        item: Result<Broadcast, RecvError>,
    ) -> Outbound {
        match item {
            Ok(item) if item.relayed.sequence <= self.floor => Outbound::Skip,
            Ok(item) if item.origin == Some(self.connection_id) => Outbound::Skip,
            Ok(item) => Outbound::Frame(ServerMessage::Event(item.relayed)),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(session = %session.id(), user = %user_id, skipped, "Connection lagged, resyncing");
                let welcome = session.welcome(user_id);
                self.floor = welcome.sequence().unwrap_or(self.floor);
                Outbound::Frame(welcome)
            }
            Err(RecvError::Closed) => Outbound::Closed,
        }
    }
}

/// Parse and publish one client frame. Returns an error frame to send back
/// when the frame is rejected.
fn handle_inbound(
    session: &Session,
    connection_id: Uuid,
    user_id: &str,
    text: &str,
) -> Option<ServerMessage> {
    let result = CollabEvent::from_json(text)
        .map_err(|e| e.to_string())
        .and_then(|event| {
            session
                .publish(Some(connection_id), user_id, event)
                .map_err(|e| e.to_string())
        });

    match result {
        Ok(sequence) => {
            tracing::trace!(session = %session.id(), user = %user_id, sequence, "accepted event");
            None
        }
        Err(message) => {
            tracing::debug!(session = %session.id(), user = %user_id, "Rejected frame: {}", message);
            Some(ServerMessage::Error { message })
        }
    }
}

async fn send_frame<S>(sink: &mut S, frame: &ServerMessage) -> Result<(), ()>
where
    S: futures::Sink<Message> + Unpin,
{
    let json = match frame.to_json() {
        Ok(json) => json,
        Err(e) => {
            tracing::error!("Failed to encode frame: {}", e);
            return Err(());
        }
    };
    sink.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use impress_collab::{DocumentEdit, SessionMirror};

    fn insert(position: u32, text: &str) -> CollabEvent {
        CollabEvent::DocumentEdit(DocumentEdit::insert("notes", position, text, "bob"))
    }

    fn fold(mirror: &mut SessionMirror, frame: ServerMessage) {
        match frame {
            ServerMessage::Welcome { snapshot, .. } => *mirror = SessionMirror::from_snapshot(snapshot),
            ServerMessage::Event(relayed) => {
                mirror.apply(&relayed.event).unwrap();
            }
            ServerMessage::Error { message } => panic!("unexpected error frame: {}", message),
        }
    }

    #[tokio::test]
    async fn test_lagged_connection_gets_welcome_without_stale_events() {
        let session = Session::new("s", 2, false);
        let (welcome, mut rx) = session.join("alice");
        let mut forwarder = Forwarder::new(Uuid::new_v4(), &welcome);
        let mut mirror = SessionMirror::new();
        fold(&mut mirror, welcome);

        for (i, text) in ["a", "b", "c", "d"].iter().enumerate() {
            session.publish(None, "bob", insert(i as u32, text)).unwrap();
        }

        // only the last two events are still buffered
        match forwarder.route(&session, "alice", rx.recv().await) {
            Outbound::Frame(frame) => {
                assert_eq!(frame.sequence(), Some(4));
                fold(&mut mirror, frame);
            }
            other => panic!("expected resync welcome, got {:?}", other),
        }
        for _ in 0..2 {
            let routed = forwarder.route(&session, "alice", rx.recv().await);
            assert!(matches!(routed, Outbound::Skip), "{:?}", routed);
        }

        session.publish(None, "bob", insert(4, "e")).unwrap();
        match forwarder.route(&session, "alice", rx.recv().await) {
            Outbound::Frame(frame) => {
                assert_eq!(frame.sequence(), Some(5));
                fold(&mut mirror, frame);
            }
            other => panic!("expected event, got {:?}", other),
        }

        assert_eq!(mirror.document("notes").unwrap().text(), "abcde");
        assert_eq!(session.snapshot().1.documents["notes"], "abcde");
    }

    #[tokio::test]
    async fn test_own_events_are_not_echoed() {
        let session = Session::new("s", 8, false);
        let (welcome, mut rx) = session.join("bob");
        let connection_id = Uuid::new_v4();
        let mut forwarder = Forwarder::new(connection_id, &welcome);

        session.publish(Some(connection_id), "bob", insert(0, "x")).unwrap();
        session.publish(None, "bob", insert(1, "y")).unwrap();

        let own = forwarder.route(&session, "bob", rx.recv().await);
        assert!(matches!(own, Outbound::Skip));
        let other = forwarder.route(&session, "bob", rx.recv().await);
        assert!(matches!(other, Outbound::Frame(ServerMessage::Event(_))));
    }
}
