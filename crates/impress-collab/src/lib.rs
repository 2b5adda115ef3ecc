//! Shared collaboration model for real-time sessions.
//!
//! This crate provides the pieces both ends of the relay agree on:
//! - Presence and role-based permissions for participants
//! - Whiteboard elements and document edits with last-writer-wins replay
//! - The event enum and server frames that travel over the socket
//! - A session mirror that folds events into local state

pub mod document;
pub mod error;
pub mod event;
pub mod mirror;
pub mod permissions;
pub mod presence;
pub mod protocol;
pub mod whiteboard;

pub use document::{DocumentBuffer, DocumentEdit, EditKind};
pub use error::{CollabError, Result};
pub use event::{CollabEvent, CursorUpdate, EventKind};
pub use mirror::SessionMirror;
pub use permissions::{Permissions, Role};
pub use presence::{color_for_user, CursorPosition, Selection, UserPresence};
pub use protocol::{RelayedEvent, ServerMessage, SessionSnapshot};
pub use whiteboard::{ElementKind, Geometry, Point, Whiteboard, WhiteboardChange, WhiteboardElement};
