//! Error types for impress-collab

use thiserror::Error;

/// Result type alias for collaboration model operations
pub type Result<T> = std::result::Result<T, CollabError>;

/// Main error type for the collaboration model
#[derive(Error, Debug)]
pub enum CollabError {
    /// Whiteboard element failed validation
    #[error("Invalid element {id}: {reason}")]
    InvalidElement { id: String, reason: String },

    /// Document edit failed validation
    #[error("Invalid edit {id}: {reason}")]
    InvalidEdit { id: String, reason: String },

    /// Edit addressed to a different document than the buffer
    #[error("Edit {edit_id} targets document {target}, buffer holds {actual}")]
    DocumentMismatch {
        edit_id: String,
        target: String,
        actual: String,
    },

    /// Frame could not be decoded
    #[error("Malformed frame: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for CollabError {
    fn from(err: serde_json::Error) -> Self {
        CollabError::Malformed(err.to_string())
    }
}
