//! Events exchanged between session participants.

use serde::{Deserialize, Serialize};

use crate::document::DocumentEdit;
use crate::error::Result;
use crate::presence::{CursorPosition, Selection, UserPresence};
use crate::whiteboard::WhiteboardChange;

/// A pointer or selection move by one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorUpdate {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
}

/// Everything that can flow through a session, tagged on the wire as
/// `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum CollabEvent {
    Presence(UserPresence),
    Cursor(CursorUpdate),
    Whiteboard(WhiteboardChange),
    DocumentEdit(DocumentEdit),
    #[serde(rename_all = "camelCase")]
    Leave {
        user_id: String,
    },
}

/// Discriminant of [`CollabEvent`], used to route events to handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Presence,
    Cursor,
    Whiteboard,
    DocumentEdit,
    Leave,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Presence => write!(f, "presence"),
            EventKind::Cursor => write!(f, "cursor"),
            EventKind::Whiteboard => write!(f, "whiteboard"),
            EventKind::DocumentEdit => write!(f, "document_edit"),
            EventKind::Leave => write!(f, "leave"),
        }
    }
}

impl CollabEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            CollabEvent::Presence(_) => EventKind::Presence,
            CollabEvent::Cursor(_) => EventKind::Cursor,
            CollabEvent::Whiteboard(_) => EventKind::Whiteboard,
            CollabEvent::DocumentEdit(_) => EventKind::DocumentEdit,
            CollabEvent::Leave { .. } => EventKind::Leave,
        }
    }

    /// User the event claims to come from
    pub fn author(&self) -> &str {
        match self {
            CollabEvent::Presence(presence) => &presence.user_id,
            CollabEvent::Cursor(update) => &update.user_id,
            CollabEvent::Whiteboard(change) => change.user_id(),
            CollabEvent::DocumentEdit(edit) => &edit.user_id,
            CollabEvent::Leave { user_id } => user_id,
        }
    }

    /// Whether the event changes shared content rather than presence
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            CollabEvent::Whiteboard(_) | CollabEvent::DocumentEdit(_)
        )
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            CollabEvent::Whiteboard(change) => change.validate(),
            CollabEvent::DocumentEdit(edit) => edit.validate(),
            _ => Ok(()),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
