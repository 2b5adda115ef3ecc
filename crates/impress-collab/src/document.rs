//! Shared text documents and naive edit replay.
//!
//! Edits are applied in the order they are received. There is no
//! operational transform: two participants editing the same region at once
//! simply see the later edit land on whatever text the earlier one left.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CollabError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditKind {
    Insert,
    Delete,
    Format,
}

/// An insert/delete/format operation against a shared text buffer.
///
/// `position` and `length` count characters, not bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentEdit {
    pub id: String,
    pub document_id: String,
    #[serde(rename = "type")]
    pub kind: EditKind,
    pub position: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
}

impl DocumentEdit {
    fn build(
        document_id: impl Into<String>,
        kind: EditKind,
        position: u32,
        content: Option<String>,
        length: Option<u32>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.into(),
            kind,
            position,
            content,
            length,
            user_id: user_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn insert(
        document_id: impl Into<String>,
        position: u32,
        content: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self::build(
            document_id,
            EditKind::Insert,
            position,
            Some(content.into()),
            None,
            user_id,
        )
    }

    pub fn delete(
        document_id: impl Into<String>,
        position: u32,
        length: u32,
        user_id: impl Into<String>,
    ) -> Self {
        Self::build(document_id, EditKind::Delete, position, None, Some(length), user_id)
    }

    /// Formatting over a range; `content` carries the style name.
    pub fn format(
        document_id: impl Into<String>,
        position: u32,
        length: u32,
        style: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self::build(
            document_id,
            EditKind::Format,
            position,
            Some(style.into()),
            Some(length),
            user_id,
        )
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| CollabError::InvalidEdit {
            id: self.id.clone(),
            reason: reason.to_string(),
        };
        if self.id.is_empty() {
            return Err(invalid("empty id"));
        }
        if self.document_id.is_empty() {
            return Err(invalid("empty document id"));
        }
        match self.kind {
            EditKind::Insert if self.content.is_none() => Err(invalid("insert needs content")),
            EditKind::Delete if self.length.is_none() => Err(invalid("delete needs a length")),
            EditKind::Format if self.length.is_none() => Err(invalid("format needs a length")),
            _ => Ok(()),
        }
    }
}

/// Local copy of one shared document.
#[derive(Debug, Clone)]
pub struct DocumentBuffer {
    document_id: String,
    text: String,
    version: u64,
    applied: HashSet<String>,
}

impl DocumentBuffer {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self::with_text(document_id, String::new())
    }

    /// Start from known text, e.g. a snapshot. Version starts at zero.
    pub fn with_text(document_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            text: text.into(),
            version: 0,
            applied: HashSet::new(),
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of edits applied since the buffer was created
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// Apply an edit. Returns `Ok(false)` when the edit id was already seen.
    ///
    /// Out-of-range positions and lengths are clamped to the text.
    pub fn apply(&mut self, edit: &DocumentEdit) -> Result<bool> {
        if edit.document_id != self.document_id {
            return Err(CollabError::DocumentMismatch {
                edit_id: edit.id.clone(),
                target: edit.document_id.clone(),
                actual: self.document_id.clone(),
            });
        }
        edit.validate()?;

        if self.applied.contains(&edit.id) {
            tracing::debug!(edit_id = %edit.id, "skipping already applied edit");
            return Ok(false);
        }

        let start = self.byte_offset(edit.position as usize);
        match edit.kind {
            EditKind::Insert => {
                let content = edit.content.as_deref().unwrap_or_default();
                self.text.insert_str(start, content);
            }
            EditKind::Delete => {
                let length = edit.length.unwrap_or(0) as usize;
                let end = self.byte_offset(edit.position as usize + length);
                self.text.replace_range(start..end, "");
            }
            // styling lives outside the plain-text mirror
            EditKind::Format => {}
        }

        self.applied.insert(edit.id.clone());
        self.version += 1;
        Ok(true)
    }

    fn byte_offset(&self, char_pos: usize) -> usize {
        self.text
            .char_indices()
            .nth(char_pos)
            .map(|(idx, _)| idx)
            .unwrap_or(self.text.len())
    }
}
