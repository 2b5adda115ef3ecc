//! Real-time presence awareness for collaborative sessions.
//!
//! Tracks who is in a session, where their pointer is, what text they have
//! selected and whether they are still active.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::permissions::Role;

/// Colours handed out to participants, picked deterministically by user id.
pub const PRESENCE_PALETTE: [&str; 8] = [
    "#EF4444", "#F59E0B", "#10B981", "#3B82F6", "#8B5CF6", "#EC4899", "#14B8A6", "#F97316",
];

/// Pick a stable palette colour for a user id.
pub fn color_for_user(user_id: &str) -> &'static str {
    // FNV-1a keeps the pick stable across processes and platforms
    let hash = user_id.bytes().fold(0xcbf29ce484222325u64, |acc, b| {
        (acc ^ b as u64).wrapping_mul(0x100000001b3)
    });
    PRESENCE_PALETTE[(hash % PRESENCE_PALETTE.len() as u64) as usize]
}

/// A pointer position on the shared canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
}

impl CursorPosition {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A text selection as character offsets into a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub start: u32,
    pub end: u32,
}

impl Selection {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Number of selected characters; a reversed range counts as empty.
    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Live metadata about a connected participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPresence {
    /// Unique participant id; presence entries are keyed by it
    pub user_id: String,

    /// Display name
    pub name: String,

    /// Role within the session
    #[serde(default)]
    pub role: Role,

    /// Pointer position, if the participant is over the canvas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorPosition>,

    /// Text selection, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,

    /// Whether the participant has been active recently
    pub is_active: bool,

    /// Last time activity was seen
    pub last_seen: DateTime<Utc>,

    /// Colour used to draw this participant's cursor
    pub color: String,
}

impl UserPresence {
    /// Create an active presence with a colour derived from the user id.
    pub fn new(user_id: impl Into<String>, name: impl Into<String>, role: Role) -> Self {
        let user_id = user_id.into();
        let color = color_for_user(&user_id).to_string();
        Self {
            user_id,
            name: name.into(),
            role,
            cursor: None,
            selection: None,
            is_active: true,
            last_seen: Utc::now(),
            color,
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    /// Move the cursor and selection; counts as activity.
    pub fn update_cursor(&mut self, cursor: Option<CursorPosition>, selection: Option<Selection>) {
        self.cursor = cursor;
        self.selection = selection;
        self.touch();
    }

    /// Mark the participant active as of now.
    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
        self.is_active = true;
    }

    pub fn mark_inactive(&mut self) {
        self.is_active = false;
    }

    pub fn idle_duration(&self) -> chrono::Duration {
        Utc::now() - self.last_seen
    }

    /// True when the participant is still flagged active but has been quiet
    /// for longer than `idle_threshold`.
    pub fn should_be_idle(&self, idle_threshold: chrono::Duration) -> bool {
        self.is_active && self.idle_duration() > idle_threshold
    }
}
