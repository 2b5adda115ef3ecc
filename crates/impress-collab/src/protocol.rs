//! Frames sent from the relay to clients.
//!
//! Clients send bare [`CollabEvent`] JSON; the relay answers with
//! [`ServerMessage`] frames tagged by `kind`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::event::CollabEvent;
use crate::presence::UserPresence;
use crate::whiteboard::WhiteboardElement;

/// Full state of a session at a point in time.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub participants: Vec<UserPresence>,
    /// Whiteboard elements in display order
    pub elements: Vec<WhiteboardElement>,
    /// Document id to current text
    pub documents: BTreeMap<String, String>,
}

/// An event as relayed to the other participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayedEvent {
    /// Per-session insertion order
    pub sequence: u64,
    /// Connection user the relay received the event from
    pub sender: String,
    pub event: CollabEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First frame on every connection, and again after a resync
    #[serde(rename_all = "camelCase")]
    Welcome {
        session_id: String,
        user_id: String,
        /// Sequence of the last event folded into the snapshot
        sequence: u64,
        snapshot: SessionSnapshot,
    },
    Event(RelayedEvent),
    /// A client frame was rejected; the connection stays open
    Error { message: String },
}

impl ServerMessage {
    /// Highest sequence this frame covers. `None` for error frames.
    pub fn sequence(&self) -> Option<u64> {
        match self {
            ServerMessage::Welcome { sequence, .. } => Some(*sequence),
            ServerMessage::Event(relayed) => Some(relayed.sequence),
            ServerMessage::Error { .. } => None,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
