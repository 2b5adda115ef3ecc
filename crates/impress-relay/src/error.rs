//! Error types for impress-relay

use axum::http::StatusCode;
use thiserror::Error;

use impress_collab::CollabError;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors raised while relaying events through a session
#[derive(Error, Debug)]
pub enum RelayError {
    /// Event failed model validation
    #[error("Invalid event: {0}")]
    InvalidEvent(#[from] CollabError),

    /// Event claims to come from someone other than its sender
    #[error("Event authored by {author} cannot be sent by {sender}")]
    AuthorMismatch { sender: String, author: String },

    /// Sender's role does not allow the mutation
    #[error("Participant {user_id} is not allowed to {action}")]
    Forbidden { user_id: String, action: String },

    /// Session not found
    #[error("Session not found: {0}")]
    SessionNotFound(String),
}

impl RelayError {
    /// HTTP status for REST handlers
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::InvalidEvent(_) | RelayError::AuthorMismatch { .. } => {
                StatusCode::BAD_REQUEST
            }
            RelayError::Forbidden { .. } => StatusCode::FORBIDDEN,
            RelayError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

/// Errors raised by [`crate::client::RelayClient`]
#[derive(Error, Debug)]
pub enum ClientError {
    /// WebSocket transport failure
    #[error("Connection error: {0}")]
    Connection(#[from] tokio_tungstenite::tungstenite::Error),

    /// Frame or event could not be encoded, decoded or applied
    #[error("Collaboration error: {0}")]
    Collab(#[from] CollabError),

    /// Server did not open the connection with a welcome frame
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Client tried to send an event authored by someone else
    #[error("Client for {expected} cannot send an event authored by {actual}")]
    NotOwnEvent { expected: String, actual: String },

    /// Too many events are waiting for a connection
    #[error("Outbox full ({0} pending events)")]
    OutboxFull(usize),

    /// `connect` was called while the connection task is running
    #[error("Client is already connected")]
    AlreadyConnected,
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {message}")]
    Io { path: String, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid value: {0}")]
    Invalid(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}
