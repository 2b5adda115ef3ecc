//! Reconnecting relay client
//!
//! Keeps a local [`SessionMirror`] in step with a relay session. Outbound
//! events are applied locally, queued, and written whenever a connection is
//! up; a dropped connection is retried with exponential backoff and the
//! queue is replayed in order once the relay welcomes the client back.

mod backoff;
mod handlers;
mod outbox;

pub use backoff::ReconnectPolicy;
pub use handlers::EventHandlers;
pub use outbox::Outbox;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use futures::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};

use impress_collab::{
    CollabEvent, CursorPosition, CursorUpdate, EventKind, RelayedEvent, Selection, ServerMessage,
    SessionMirror, SessionSnapshot, UserPresence,
};

use crate::error::ClientError;

/// Connection lifecycle as reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Error => write!(f, "error"),
        }
    }
}

/// Where and as whom to connect
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay base URL, e.g. `ws://127.0.0.1:8787`
    pub server_url: String,
    pub session_id: String,
    pub presence: UserPresence,
    pub token: Option<String>,
    pub reconnect: ReconnectPolicy,
    /// Maximum events buffered while disconnected
    pub outbox_capacity: usize,
    /// How long to wait for the relay's welcome after the upgrade
    pub handshake_timeout: Duration,
}

impl ClientConfig {
    pub fn new(
        server_url: impl Into<String>,
        session_id: impl Into<String>,
        presence: UserPresence,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            session_id: session_id.into(),
            presence,
            token: None,
            reconnect: ReconnectPolicy::default(),
            outbox_capacity: 1024,
            handshake_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn user_id(&self) -> &str {
        &self.presence.user_id
    }

    /// Session-scoped WebSocket endpoint
    pub fn endpoint(&self) -> String {
        let mut url = format!(
            "{}/sessions/{}/ws?userId={}",
            self.server_url.trim_end_matches('/'),
            urlencoding::encode(&self.session_id),
            urlencoding::encode(self.user_id()),
        );
        if let Some(token) = &self.token {
            url.push_str("&token=");
            url.push_str(&urlencoding::encode(token));
        }
        url
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ClientShared {
    config: ClientConfig,
    presence: Mutex<UserPresence>,
    mirror: Mutex<SessionMirror>,
    outbox: Mutex<Outbox>,
    handlers: RwLock<EventHandlers>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    wake: Notify,
    last_sequence: AtomicU64,
}

/// Why a live connection ended
enum SessionEnd {
    Shutdown,
    Dropped,
}

impl ClientShared {
    fn set_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            tracing::debug!(session = %self.config.session_id, %state, "Connection state changed");
            self.handlers
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .notify_state(state);
        }
    }

    /// Replace the mirror with a welcome snapshot, then re-apply our own
    /// presence and everything still queued so local state keeps showing
    /// changes the relay has not seen yet.
    fn install_snapshot(&self, sequence: u64, snapshot: SessionSnapshot) {
        let mut mirror = SessionMirror::from_snapshot(snapshot);
        let presence = lock(&self.presence).clone();
        let _ = mirror.apply(&CollabEvent::Presence(presence));
        for event in lock(&self.outbox).iter() {
            if let Err(e) = mirror.apply(event) {
                tracing::warn!("Queued event no longer applies locally: {}", e);
            }
        }
        *lock(&self.mirror) = mirror;
        self.last_sequence.store(sequence, Ordering::SeqCst);
    }

    fn handle_frame(&self, text: &str) {
        match ServerMessage::from_json(text) {
            Ok(ServerMessage::Welcome {
                sequence, snapshot, ..
            }) => {
                tracing::info!(session = %self.config.session_id, sequence, "Resynced from snapshot");
                self.install_snapshot(sequence, snapshot);
            }
            Ok(ServerMessage::Event(relayed)) => self.handle_event(relayed),
            Ok(ServerMessage::Error { message }) => {
                tracing::warn!(session = %self.config.session_id, "Relay rejected event: {}", message);
            }
            Err(e) => {
                tracing::warn!(session = %self.config.session_id, "Undecodable frame: {}", e);
            }
        }
    }

    /// Apply a relayed event. Anything at or below the last sequence seen is
    /// already part of the mirror, e.g. events buffered behind a resync
    /// welcome, and is dropped.
    fn handle_event(&self, relayed: RelayedEvent) {
        let last = self.last_sequence.load(Ordering::SeqCst);
        if relayed.sequence <= last {
            tracing::trace!(sequence = relayed.sequence, last, "skipping already applied event");
            return;
        }
        if let Err(e) = lock(&self.mirror).apply(&relayed.event) {
            tracing::warn!(sequence = relayed.sequence, "Failed to apply relayed event: {}", e);
        }
        self.last_sequence.store(relayed.sequence, Ordering::SeqCst);
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .dispatch(&relayed);
    }

    /// Write queued events in order. A failed send goes back to the front.
    async fn flush<S>(&self, sink: &mut S) -> Result<(), ClientError>
    where
        S: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        loop {
            let Some(event) = lock(&self.outbox).pop() else {
                return Ok(());
            };
            let json = event.to_json()?;
            if let Err(e) = sink.send(Message::text(json)).await {
                lock(&self.outbox).requeue(event);
                return Err(e.into());
            }
        }
    }
}

/// Client side of a relay session
pub struct RelayClient {
    shared: Arc<ClientShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RelayClient {
    pub fn new(config: ClientConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);
        let outbox = Outbox::new(config.outbox_capacity);

        let mut mirror = SessionMirror::new();
        let _ = mirror.apply(&CollabEvent::Presence(config.presence.clone()));

        Self {
            shared: Arc::new(ClientShared {
                presence: Mutex::new(config.presence.clone()),
                config,
                mirror: Mutex::new(mirror),
                outbox: Mutex::new(outbox),
                handlers: RwLock::new(EventHandlers::new()),
                state_tx,
                shutdown_tx,
                wake: Notify::new(),
                last_sequence: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn user_id(&self) -> &str {
        self.shared.config.user_id()
    }

    /// Register a callback for relayed events of `kind`
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&RelayedEvent) + Send + Sync + 'static,
    {
        self.handlers_mut().on(kind, handler);
    }

    pub fn on_any<F>(&self, handler: F)
    where
        F: Fn(&RelayedEvent) + Send + Sync + 'static,
    {
        self.handlers_mut().on_any(handler);
    }

    pub fn on_state_change<F>(&self, handler: F)
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.handlers_mut().on_state_change(handler);
    }

    fn handlers_mut(&self) -> std::sync::RwLockWriteGuard<'_, EventHandlers> {
        self.shared
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the background connection task.
    pub fn connect(&self) -> Result<(), ClientError> {
        let mut task = lock(&self.task);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(ClientError::AlreadyConnected);
        }
        self.shared.shutdown_tx.send_replace(false);
        *task = Some(tokio::spawn(run(Arc::clone(&self.shared))));
        Ok(())
    }

    /// Whether the connection task is still alive (connected or retrying)
    pub fn is_running(&self) -> bool {
        lock(&self.task)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the connection task and wait for it to finish.
    pub async fn close(&self) {
        self.shared.shutdown_tx.send_replace(true);
        let handle = lock(&self.task).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("Connection task ended abnormally: {}", e);
            }
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// Apply an event locally and queue it for the relay.
    pub fn send(&self, event: CollabEvent) -> Result<(), ClientError> {
        if event.author() != self.user_id() {
            return Err(ClientError::NotOwnEvent {
                expected: self.user_id().to_string(),
                actual: event.author().to_string(),
            });
        }
        event.validate()?;

        if let CollabEvent::Presence(presence) = &event {
            *lock(&self.shared.presence) = presence.clone();
        }
        lock(&self.shared.outbox).push(event.clone())?;
        if let Err(e) = lock(&self.shared.mirror).apply(&event) {
            tracing::warn!("Event did not apply locally: {}", e);
        }
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Move our cursor and selection
    pub fn update_cursor(
        &self,
        cursor: Option<CursorPosition>,
        selection: Option<Selection>,
    ) -> Result<(), ClientError> {
        {
            let mut presence = lock(&self.shared.presence);
            presence.update_cursor(cursor, selection);
        }
        self.send(CollabEvent::Cursor(CursorUpdate {
            user_id: self.user_id().to_string(),
            cursor,
            selection,
        }))
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Current local view of the session
    pub fn snapshot(&self) -> SessionSnapshot {
        lock(&self.shared.mirror).snapshot()
    }

    pub fn document_text(&self, document_id: &str) -> Option<String> {
        lock(&self.shared.mirror)
            .document(document_id)
            .map(|doc| doc.text().to_string())
    }

    /// Events waiting to be written
    pub fn pending(&self) -> usize {
        lock(&self.shared.outbox).len()
    }

    /// Sequence of the last relayed event seen
    pub fn last_sequence(&self) -> u64 {
        self.shared.last_sequence.load(Ordering::SeqCst)
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
    }
}

/// Connection task: connect, run, back off, repeat.
async fn run(shared: Arc<ClientShared>) {
    let mut shutdown = shared.shutdown_tx.subscribe();
    let url = shared.config.endpoint();
    let policy = shared.config.reconnect;
    let mut failures = 0u32;

    loop {
        if *shutdown.borrow() {
            break;
        }
        shared.set_state(ConnectionState::Connecting);

        let attempt = tokio::select! {
            result = tokio_tungstenite::connect_async(url.as_str()) => result,
            _ = shutdown.changed() => break,
        };

        match attempt {
            Ok((ws, _response)) => {
                let (mut sink, mut stream) = ws.split();
                match handshake(&shared, &mut stream, &mut shutdown).await {
                    Ok(Handshake::Welcomed) => {
                        failures = 0;
                        shared.set_state(ConnectionState::Connected);
                        match run_connection(&shared, &mut sink, &mut stream, &mut shutdown).await {
                            Ok(SessionEnd::Shutdown) => break,
                            Ok(SessionEnd::Dropped) => {
                                tracing::info!(session = %shared.config.session_id, "Connection closed by relay");
                                shared.set_state(ConnectionState::Disconnected);
                            }
                            Err(e) => {
                                tracing::warn!(session = %shared.config.session_id, "Connection lost: {}", e);
                                shared.set_state(ConnectionState::Disconnected);
                            }
                        }
                    }
                    Ok(Handshake::Shutdown) => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(session = %shared.config.session_id, "Handshake failed: {}", e);
                        shared.set_state(ConnectionState::Error);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(session = %shared.config.session_id, "Connect failed: {}", e);
                shared.set_state(ConnectionState::Error);
            }
        }

        failures += 1;
        let Some(delay) = policy.delay_for(failures) else {
            tracing::error!(
                session = %shared.config.session_id,
                attempts = policy.max_attempts,
                "Giving up reconnecting"
            );
            shared.set_state(ConnectionState::Error);
            return;
        };
        tracing::debug!(attempt = failures, ?delay, "Reconnecting after delay");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    shared.set_state(ConnectionState::Disconnected);
}

/// Outcome of waiting for the welcome frame
enum Handshake {
    Welcomed,
    Shutdown,
}

/// Wait for the relay's opening welcome and install its snapshot. Anything
/// else first, a closed socket, or no welcome within the handshake timeout
/// is a handshake error.
async fn handshake<St>(
    shared: &ClientShared,
    stream: &mut St,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<Handshake, ClientError>
where
    St: futures::Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let first = tokio::select! {
        frame = tokio::time::timeout(shared.config.handshake_timeout, stream.next()) => {
            frame.map_err(|_| ClientError::Handshake("timed out waiting for welcome".to_string()))?
        }
        _ = shutdown.changed() => return Ok(Handshake::Shutdown),
    };

    match first {
        Some(Ok(Message::Text(text))) => match ServerMessage::from_json(text.as_str())? {
            ServerMessage::Welcome {
                sequence, snapshot, ..
            } => {
                shared.install_snapshot(sequence, snapshot);
                Ok(Handshake::Welcomed)
            }
            other => Err(ClientError::Handshake(format!(
                "expected welcome, got {:?}",
                other
            ))),
        },
        Some(Ok(other)) => Err(ClientError::Handshake(format!(
            "expected welcome, got {:?}",
            other
        ))),
        Some(Err(e)) => Err(e.into()),
        None => Err(ClientError::Handshake(
            "connection closed before welcome".to_string(),
        )),
    }
}

/// Drive one welcomed connection until it drops or shutdown is requested.
async fn run_connection<Si, St>(
    shared: &ClientShared,
    sink: &mut Si,
    stream: &mut St,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<SessionEnd, ClientError>
where
    Si: Sink<Message, Error = tungstenite::Error> + Unpin,
    St: futures::Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let presence = CollabEvent::Presence(lock(&shared.presence).clone());
    sink.send(Message::text(presence.to_json()?)).await?;
    shared.flush(sink).await?;

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => shared.handle_frame(text.as_str()),
                Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Dropped),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
            _ = shared.wake.notified() => shared.flush(sink).await?,
            _ = shutdown.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                return Ok(SessionEnd::Shutdown);
            }
        }
    }
}
