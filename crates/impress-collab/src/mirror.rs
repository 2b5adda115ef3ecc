//! Per-session mirror of presence, whiteboard and document state.
//!
//! Both the relay and every client keep one of these. State is whatever you
//! get by applying events in the order they were received.

use std::collections::HashMap;

use crate::document::DocumentBuffer;
use crate::error::Result;
use crate::event::CollabEvent;
use crate::presence::UserPresence;
use crate::protocol::SessionSnapshot;
use crate::whiteboard::Whiteboard;

#[derive(Debug, Clone, Default)]
pub struct SessionMirror {
    participants: HashMap<String, UserPresence>,
    whiteboard: Whiteboard,
    documents: HashMap<String, DocumentBuffer>,
}

impl SessionMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a mirror from a snapshot.
    pub fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        Self {
            participants: snapshot
                .participants
                .into_iter()
                .map(|p| (p.user_id.clone(), p))
                .collect(),
            whiteboard: Whiteboard::from_elements(snapshot.elements),
            documents: snapshot
                .documents
                .into_iter()
                .map(|(id, text)| (id.clone(), DocumentBuffer::with_text(id, text)))
                .collect(),
        }
    }

    /// Apply one event. Returns whether local state changed.
    pub fn apply(&mut self, event: &CollabEvent) -> Result<bool> {
        match event {
            CollabEvent::Presence(presence) => {
                self.participants
                    .insert(presence.user_id.clone(), presence.clone());
                Ok(true)
            }
            CollabEvent::Cursor(update) => match self.participants.get_mut(&update.user_id) {
                Some(presence) => {
                    presence.update_cursor(update.cursor, update.selection);
                    Ok(true)
                }
                None => {
                    tracing::debug!(user_id = %update.user_id, "cursor for unknown participant");
                    Ok(false)
                }
            },
            CollabEvent::Whiteboard(change) => {
                change.validate()?;
                Ok(self.whiteboard.apply(change))
            }
            CollabEvent::DocumentEdit(edit) => self
                .documents
                .entry(edit.document_id.clone())
                .or_insert_with(|| DocumentBuffer::new(edit.document_id.clone()))
                .apply(edit),
            CollabEvent::Leave { user_id } => Ok(self.participants.remove(user_id).is_some()),
        }
    }

    /// Apply events in order, stopping at the first invalid one.
    pub fn replay<'a>(&mut self, events: impl IntoIterator<Item = &'a CollabEvent>) -> Result<()> {
        for event in events {
            self.apply(event)?;
        }
        Ok(())
    }

    /// Mark participants quiet for longer than `threshold` as inactive and
    /// return their updated presence.
    pub fn sweep_idle(&mut self, threshold: chrono::Duration) -> Vec<UserPresence> {
        let mut swept: Vec<UserPresence> = self
            .participants
            .values_mut()
            .filter(|p| p.should_be_idle(threshold))
            .map(|p| {
                p.mark_inactive();
                p.clone()
            })
            .collect();
        swept.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        swept
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let mut participants: Vec<UserPresence> = self.participants.values().cloned().collect();
        participants.sort_by(|a, b| a.user_id.cmp(&b.user_id));

        SessionSnapshot {
            participants,
            elements: self.whiteboard.elements().cloned().collect(),
            documents: self
                .documents
                .iter()
                .map(|(id, doc)| (id.clone(), doc.text().to_string()))
                .collect(),
        }
    }

    pub fn participant(&self, user_id: &str) -> Option<&UserPresence> {
        self.participants.get(user_id)
    }

    pub fn participants(&self) -> impl Iterator<Item = &UserPresence> {
        self.participants.values()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn whiteboard(&self) -> &Whiteboard {
        &self.whiteboard
    }

    pub fn document(&self, document_id: &str) -> Option<&DocumentBuffer> {
        self.documents.get(document_id)
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }
}
