//! Relay client integration tests

mod common;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use common::*;
use impress_collab::{
    CollabEvent, DocumentEdit, ElementKind, EventKind, Geometry, Role, ServerMessage,
    SessionSnapshot, UserPresence, WhiteboardChange, WhiteboardElement,
};
use impress_relay::{ClientConfig, ConnectionState, ReconnectPolicy, RelayClient, RelayConfig};

fn client_config(url: String, session: &str, user: &str) -> ClientConfig {
    ClientConfig::new(url, session, UserPresence::new(user, user, Role::Editor))
}

async fn wait_for_state(client: &RelayClient, state: ConnectionState) {
    let mut rx = client.watch_state();
    tokio::time::timeout(TIMEOUT, rx.wait_for(|s| *s == state))
        .await
        .expect("timed out waiting for state")
        .unwrap();
}

#[tokio::test]
async fn test_queued_events_flush_in_order_after_welcome() {
    let (addr, _state) = start_relay(RelayConfig::default()).await;
    let (mut observer, _) = join(addr, "notes", "observer").await;

    let client = RelayClient::new(client_config(format!("ws://{}", addr), "notes", "alice"));
    client
        .send(CollabEvent::DocumentEdit(DocumentEdit::insert("todo", 0, "a", "alice")))
        .unwrap();
    client
        .send(CollabEvent::DocumentEdit(DocumentEdit::insert("todo", 1, "b", "alice")))
        .unwrap();
    client
        .send(CollabEvent::Whiteboard(WhiteboardChange::Add(
            WhiteboardElement::new(ElementKind::Circle, Geometry::boxed(1.0, 1.0, 4.0, 4.0), "alice")
                .with_id("dot"),
        )))
        .unwrap();
    assert_eq!(client.pending(), 3);

    client.connect().unwrap();
    wait_for_state(&client, ConnectionState::Connected).await;

    let (seq, event) = next_event(&mut observer).await;
    assert_eq!(seq, 1);
    assert!(matches!(event, CollabEvent::Presence(_)));
    let kinds: Vec<EventKind> = [
        next_event(&mut observer).await,
        next_event(&mut observer).await,
        next_event(&mut observer).await,
    ]
    .iter()
    .map(|(_, e)| e.kind())
    .collect();
    assert_eq!(
        kinds,
        vec![EventKind::DocumentEdit, EventKind::DocumentEdit, EventKind::Whiteboard]
    );
    assert_eq!(client.pending(), 0);

    let (_late, welcome) = join(addr, "notes", "late").await;
    match welcome {
        ServerMessage::Welcome { snapshot, .. } => {
            assert_eq!(snapshot.documents["todo"], "ab");
            assert_eq!(snapshot.elements.len(), 1);
        }
        other => panic!("unexpected frame {:?}", other),
    }

    client.close().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_handlers_see_remote_events() {
    let (addr, _state) = start_relay(RelayConfig::default()).await;
    let (mut bob, _) = join(addr, "s", "bob").await;

    let client = RelayClient::new(client_config(format!("ws://{}", addr), "s", "alice"));
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.on(EventKind::DocumentEdit, move |relayed| {
        let _ = tx.send(relayed.clone());
    });
    client.connect().unwrap();
    wait_for_state(&client, ConnectionState::Connected).await;
    // alice's presence reaching bob means the relay has her subscribed
    next_event(&mut bob).await;

    send(&mut bob, &presence("bob", Role::Editor)).await;
    send(
        &mut bob,
        &CollabEvent::DocumentEdit(DocumentEdit::insert("outline", 0, "Title", "bob")),
    )
    .await;

    let relayed = tokio::time::timeout(TIMEOUT, rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(relayed.sender, "bob");
    assert_eq!(relayed.sequence, 3);
    assert_eq!(client.document_text("outline").as_deref(), Some("Title"));
    assert_eq!(client.last_sequence(), 3);

    let participants: Vec<String> = client
        .snapshot()
        .participants
        .into_iter()
        .map(|p| p.user_id)
        .collect();
    assert_eq!(participants, vec!["alice".to_string(), "bob".to_string()]);

    client.close().await;
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    // bind then drop so nothing is listening on the port
    let addr = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();

    let policy = ReconnectPolicy {
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        max_attempts: 2,
    };
    let client = RelayClient::new(
        client_config(format!("ws://{}", addr), "s", "alice").with_reconnect(policy),
    );
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    client.on_state_change(move |state| recorder.lock().unwrap().push(state));

    client.connect().unwrap();
    tokio::time::timeout(TIMEOUT, async {
        while client.is_running() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("client kept retrying");

    assert_eq!(client.state(), ConnectionState::Error);
    let seen = seen.lock().unwrap().clone();
    let connecting = seen
        .iter()
        .filter(|s| **s == ConnectionState::Connecting)
        .count();
    assert_eq!(connecting, 3);
    assert_eq!(seen.last(), Some(&ConnectionState::Error));
}

#[tokio::test]
async fn test_reconnect_replays_events_sent_while_disconnected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let welcome = ServerMessage::Welcome {
        session_id: "s".to_string(),
        user_id: "alice".to_string(),
        sequence: 0,
        snapshot: SessionSnapshot::default(),
    }
    .to_json()
    .unwrap();

    // scripted relay: drop the first connection after the presence frame,
    // then record what arrives on the second
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::text(welcome.clone())).await.unwrap();
        ws.next().await.unwrap().unwrap();
        ws.close(None).await.unwrap();
        drop(ws);

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::text(welcome)).await.unwrap();
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                let event = CollabEvent::from_json(text.as_str()).unwrap();
                if frames_tx.send(event).is_err() {
                    break;
                }
            }
        }
    });

    let policy = ReconnectPolicy {
        base_delay: Duration::from_millis(300),
        max_delay: Duration::from_secs(1),
        max_attempts: 3,
    };
    let client = RelayClient::new(
        client_config(format!("ws://{}", addr), "s", "alice").with_reconnect(policy),
    );
    client.connect().unwrap();
    wait_for_state(&client, ConnectionState::Connected).await;
    wait_for_state(&client, ConnectionState::Disconnected).await;

    client
        .send(CollabEvent::DocumentEdit(DocumentEdit::insert("draft", 0, "offline", "alice")))
        .unwrap();
    assert_eq!(client.document_text("draft").as_deref(), Some("offline"));

    let first = tokio::time::timeout(TIMEOUT, frames_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(first, CollabEvent::Presence(_)));
    let second = tokio::time::timeout(TIMEOUT, frames_rx.recv())
        .await
        .unwrap()
        .unwrap();
    match second {
        CollabEvent::DocumentEdit(edit) => assert_eq!(edit.content.as_deref(), Some("offline")),
        other => panic!("unexpected event {:?}", other),
    }

    // the local edit survives the empty welcome snapshot
    assert_eq!(client.document_text("draft").as_deref(), Some("offline"));
    client.close().await;
}

/// Relay stand-in that completes every upgrade, sends `greeting` if given,
/// and then holds the socket open without a welcome. Each accepted upgrade
/// is reported on the returned channel.
async fn stalling_relay(greeting: Option<&'static str>) -> (SocketAddr, mpsc::UnboundedReceiver<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };
            if let Some(greeting) = greeting {
                let _ = ws.send(Message::text(greeting.to_string())).await;
            }
            held.push(ws);
            let _ = accepted_tx.send(());
        }
    });
    (addr, accepted_rx)
}

async fn wait_until_stopped(client: &RelayClient) {
    tokio::time::timeout(TIMEOUT, async {
        while client.is_running() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("client kept retrying");
}

fn fast_retries(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        max_attempts,
    }
}

#[tokio::test]
async fn test_rejected_handshakes_count_toward_max_attempts() {
    let (addr, mut accepted) =
        stalling_relay(Some(r#"{"kind":"error","message":"go away"}"#)).await;

    let client = RelayClient::new(
        client_config(format!("ws://{}", addr), "s", "alice").with_reconnect(fast_retries(2)),
    );
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    client.on_state_change(move |state| recorder.lock().unwrap().push(state));

    client.connect().unwrap();
    wait_until_stopped(&client).await;

    let mut upgrades = 0;
    while accepted.try_recv().is_ok() {
        upgrades += 1;
    }
    assert_eq!(upgrades, 3);
    assert_eq!(client.state(), ConnectionState::Error);
    let seen = seen.lock().unwrap().clone();
    assert!(!seen.contains(&ConnectionState::Connected), "{:?}", seen);
    assert!(!seen.contains(&ConnectionState::Disconnected), "{:?}", seen);
}

#[tokio::test]
async fn test_close_while_waiting_for_welcome() {
    let (addr, mut accepted) = stalling_relay(None).await;

    let client = RelayClient::new(client_config(format!("ws://{}", addr), "s", "alice"));
    client.connect().unwrap();
    tokio::time::timeout(TIMEOUT, accepted.recv())
        .await
        .unwrap()
        .unwrap();

    tokio::time::timeout(TIMEOUT, client.close())
        .await
        .expect("close blocked on the handshake");
    assert!(!client.is_running());
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_missing_welcome_times_out() {
    let (addr, mut accepted) = stalling_relay(None).await;

    let client = RelayClient::new(
        client_config(format!("ws://{}", addr), "s", "alice")
            .with_reconnect(fast_retries(1))
            .with_handshake_timeout(Duration::from_millis(50)),
    );
    client.connect().unwrap();
    wait_until_stopped(&client).await;

    let mut upgrades = 0;
    while accepted.try_recv().is_ok() {
        upgrades += 1;
    }
    assert_eq!(upgrades, 2);
    assert_eq!(client.state(), ConnectionState::Error);
}

#[tokio::test]
async fn test_lagging_client_converges_with_relay() {
    let mut config = RelayConfig::default();
    config.session.broadcast_capacity = 2;
    let (addr, state) = start_relay(config).await;
    let (mut bob, _) = join(addr, "burst", "bob").await;

    let client = RelayClient::new(client_config(format!("ws://{}", addr), "burst", "alice"));
    let counted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&counted);
    client.on_any(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    client.connect().unwrap();
    wait_for_state(&client, ConnectionState::Connected).await;
    next_event(&mut bob).await;

    let letters: Vec<String> = (0..40u8).map(|i| ((b'a' + i % 26) as char).to_string()).collect();
    for (i, letter) in letters.iter().enumerate() {
        send(
            &mut bob,
            &CollabEvent::DocumentEdit(DocumentEdit::insert("notes", i as u32, letter.as_str(), "bob")),
        )
        .await;
    }

    let last = 1 + letters.len() as u64;
    tokio::time::timeout(TIMEOUT, async {
        while client.last_sequence() < last {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("client never caught up");

    let expected = letters.concat();
    assert_eq!(client.document_text("notes").as_deref(), Some(expected.as_str()));
    let relay_text = state.session("burst").await.unwrap().snapshot().1.documents["notes"].clone();
    assert_eq!(relay_text, expected);
    // each of bob's events is dispatched at most once, resync or not
    assert!(counted.load(Ordering::SeqCst) <= letters.len());

    client.close().await;
}
