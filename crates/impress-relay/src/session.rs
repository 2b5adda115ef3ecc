//! Per-session fan-out and state mirror.
//!
//! Every accepted event is applied to the session mirror, stamped with the
//! next sequence number and broadcast, all under one lock. That lock is the
//! only ordering the relay provides: participants see events in the order
//! the relay accepted them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use uuid::Uuid;

use impress_collab::{CollabEvent, RelayedEvent, ServerMessage, SessionMirror, SessionSnapshot};

use crate::error::{RelayError, Result};

/// An event on the session bus, tagged with the connection it came from so
/// that connection can skip its own echo.
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub origin: Option<Uuid>,
    pub relayed: RelayedEvent,
}

#[derive(Debug, Default)]
struct SessionInner {
    mirror: SessionMirror,
    sequence: u64,
    connections: HashMap<String, usize>,
}

/// One collaboration session
pub struct Session {
    id: String,
    enforce_roles: bool,
    inner: Mutex<SessionInner>,
    tx: broadcast::Sender<Broadcast>,
}

/// Summary of a session for listings
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub sequence: u64,
    pub participants: usize,
    pub connections: usize,
    pub elements: usize,
    pub documents: usize,
}

fn lock(inner: &Mutex<SessionInner>) -> MutexGuard<'_, SessionInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    pub fn new(id: impl Into<String>, capacity: usize, enforce_roles: bool) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            id: id.into(),
            enforce_roles,
            inner: Mutex::new(SessionInner::default()),
            tx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Register a connection for `user_id`. Returns the welcome frame and a
    /// receiver positioned right after the snapshot it carries.
    pub fn join(&self, user_id: &str) -> (ServerMessage, broadcast::Receiver<Broadcast>) {
        let mut inner = lock(&self.inner);
        *inner.connections.entry(user_id.to_string()).or_insert(0) += 1;
        let rx = self.tx.subscribe();
        (self.welcome_locked(&inner, user_id), rx)
    }

    /// Fresh welcome frame, used to resync a lagging connection.
    pub fn welcome(&self, user_id: &str) -> ServerMessage {
        let inner = lock(&self.inner);
        self.welcome_locked(&inner, user_id)
    }

    fn welcome_locked(&self, inner: &SessionInner, user_id: &str) -> ServerMessage {
        ServerMessage::Welcome {
            session_id: self.id.clone(),
            user_id: user_id.to_string(),
            sequence: inner.sequence,
            snapshot: inner.mirror.snapshot(),
        }
    }

    /// Drop one connection for `user_id`. When it was the user's last
    /// connection a `leave` event is published. Returns true when the
    /// session has no connections left.
    pub fn leave(&self, user_id: &str) -> bool {
        let mut inner = lock(&self.inner);
        let remaining = match inner.connections.get_mut(user_id) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining == 0 {
            inner.connections.remove(user_id);
            if inner.mirror.participant(user_id).is_some() {
                let leave = CollabEvent::Leave {
                    user_id: user_id.to_string(),
                };
                if let Err(e) = self.relay_locked(&mut inner, None, user_id, leave) {
                    tracing::warn!(session = %self.id, "Failed to publish leave: {}", e);
                }
            }
        }
        inner.connections.is_empty()
    }

    /// Validate, apply and broadcast an event from `sender`.
    pub fn publish(&self, origin: Option<Uuid>, sender: &str, event: CollabEvent) -> Result<u64> {
        event.validate()?;
        if event.author() != sender {
            return Err(RelayError::AuthorMismatch {
                sender: sender.to_string(),
                author: event.author().to_string(),
            });
        }

        let mut event = event;
        if let CollabEvent::Presence(presence) = &mut event {
            presence.last_seen = chrono::Utc::now();
        }

        let mut inner = lock(&self.inner);
        if self.enforce_roles && event.is_mutation() {
            let allowed = inner
                .mirror
                .participant(sender)
                .map(|p| p.role.permissions().can_edit())
                .unwrap_or(false);
            if !allowed {
                return Err(RelayError::Forbidden {
                    user_id: sender.to_string(),
                    action: format!("send {} events", event.kind()),
                });
            }
        }
        self.relay_locked(&mut inner, origin, sender, event)
    }

    fn relay_locked(
        &self,
        inner: &mut SessionInner,
        origin: Option<Uuid>,
        sender: &str,
        event: CollabEvent,
    ) -> Result<u64> {
        inner.mirror.apply(&event)?;
        inner.sequence += 1;
        let sequence = inner.sequence;

        tracing::trace!(session = %self.id, sequence, kind = %event.kind(), "relaying event");
        // no receivers is fine: the mirror already holds the change
        let _ = self.tx.send(Broadcast {
            origin,
            relayed: RelayedEvent {
                sequence,
                sender: sender.to_string(),
                event,
            },
        });
        Ok(sequence)
    }

    /// Mark idle participants inactive and broadcast their presence.
    /// Returns how many were swept.
    pub fn sweep_idle(&self, threshold: chrono::Duration) -> usize {
        let mut inner = lock(&self.inner);
        let swept = inner.mirror.sweep_idle(threshold);
        let count = swept.len();
        for presence in swept {
            let user_id = presence.user_id.clone();
            if let Err(e) =
                self.relay_locked(&mut inner, None, &user_id, CollabEvent::Presence(presence))
            {
                tracing::warn!(session = %self.id, "Failed to publish idle presence: {}", e);
            }
        }
        count
    }

    pub fn snapshot(&self) -> (u64, SessionSnapshot) {
        let inner = lock(&self.inner);
        (inner.sequence, inner.mirror.snapshot())
    }

    pub fn summary(&self) -> SessionSummary {
        let inner = lock(&self.inner);
        SessionSummary {
            id: self.id.clone(),
            sequence: inner.sequence,
            participants: inner.mirror.participant_count(),
            connections: inner.connections.values().sum(),
            elements: inner.mirror.whiteboard().len(),
            documents: inner.mirror.document_count(),
        }
    }
}

/// Shared handle to a session
pub type SessionHandle = Arc<Session>;

#[cfg(test)]
mod tests {
    use super::*;
    use impress_collab::{
        DocumentEdit, ElementKind, Geometry, Role, UserPresence, WhiteboardChange,
        WhiteboardElement,
    };

    fn presence(user: &str, role: Role) -> CollabEvent {
        CollabEvent::Presence(UserPresence::new(user, user, role))
    }

    #[test]
    fn test_publish_assigns_sequence_and_broadcasts() {
        let session = Session::new("s1", 16, false);
        let (_, mut rx) = session.join("alice");

        let seq1 = session.publish(None, "alice", presence("alice", Role::Editor)).unwrap();
        let seq2 = session
            .publish(
                None,
                "alice",
                CollabEvent::DocumentEdit(DocumentEdit::insert("notes", 0, "hi", "alice")),
            )
            .unwrap();
        assert_eq!((seq1, seq2), (1, 2));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.relayed.sequence, 1);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.relayed.sender, "alice");
        assert_eq!(session.snapshot().1.documents["notes"], "hi");
    }

    #[test]
    fn test_author_mismatch_rejected() {
        let session = Session::new("s1", 16, false);
        let err = session
            .publish(None, "mallory", presence("alice", Role::Owner))
            .unwrap_err();
        assert!(matches!(err, RelayError::AuthorMismatch { .. }));
        assert_eq!(session.snapshot().0, 0);
    }

    #[test]
    fn test_roles_enforced_when_enabled() {
        let session = Session::new("s1", 16, true);
        session.publish(None, "vera", presence("vera", Role::Viewer)).unwrap();

        let element = WhiteboardElement::new(
            ElementKind::Rectangle,
            Geometry::boxed(0.0, 0.0, 1.0, 1.0),
            "vera",
        );
        let err = session
            .publish(None, "vera", CollabEvent::Whiteboard(WhiteboardChange::Add(element)))
            .unwrap_err();
        assert!(matches!(err, RelayError::Forbidden { .. }));

        // unknown participants cannot mutate either
        let edit = CollabEvent::DocumentEdit(DocumentEdit::insert("d", 0, "x", "nobody"));
        assert!(session.publish(None, "nobody", edit).is_err());
    }

    #[test]
    fn test_leave_publishes_once_for_last_connection() {
        let session = Session::new("s1", 16, false);
        let _first = session.join("alice");
        let _second = session.join("alice");
        session.publish(None, "alice", presence("alice", Role::Editor)).unwrap();

        assert!(!session.leave("alice"));
        assert_eq!(session.snapshot().1.participants.len(), 1);

        assert!(session.leave("alice"));
        let (sequence, snapshot) = session.snapshot();
        assert!(snapshot.participants.is_empty());
        assert_eq!(sequence, 2);
    }

    #[test]
    fn test_welcome_reflects_current_state() {
        let session = Session::new("s1", 16, false);
        session.publish(None, "bob", presence("bob", Role::Editor)).unwrap();

        let (welcome, _rx) = session.join("carol");
        match welcome {
            ServerMessage::Welcome {
                sequence, snapshot, ..
            } => {
                assert_eq!(sequence, 1);
                assert_eq!(snapshot.participants[0].user_id, "bob");
            }
            other => panic!("unexpected frame {:?}", other),
        }
        assert_eq!(session.summary().connections, 1);
    }

    #[test]
    fn test_sweep_idle_broadcasts_presence() {
        let session = Session::new("s1", 16, false);
        let (_, mut rx) = session.join("alice");
        session.publish(None, "alice", presence("alice", Role::Editor)).unwrap();
        let _ = rx.try_recv();

        assert_eq!(session.sweep_idle(chrono::Duration::seconds(-1)), 1);
        match rx.try_recv().unwrap().relayed.event {
            CollabEvent::Presence(p) => assert!(!p.is_active),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
