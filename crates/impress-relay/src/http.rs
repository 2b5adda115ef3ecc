//! HTTP endpoint handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use impress_collab::{CollabEvent, SessionSnapshot};

use crate::error::RelayError;
use crate::session::SessionSummary;
use crate::RelayState;

/// Response for session listings
#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionSummary>,
}

/// List active sessions
pub async fn list_sessions(State(state): State<Arc<RelayState>>) -> Json<SessionsResponse> {
    Json(SessionsResponse {
        sessions: state.summaries().await,
    })
}

/// Full state of one session
#[derive(Debug, Serialize)]
pub struct SessionDetail {
    pub id: String,
    pub sequence: u64,
    pub snapshot: SessionSnapshot,
}

/// Get a session snapshot
pub async fn get_session(
    State(state): State<Arc<RelayState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionDetail>, (StatusCode, String)> {
    let session = state.session(&id).await.ok_or_else(|| {
        let err = RelayError::SessionNotFound(id.clone());
        (err.status_code(), err.to_string())
    })?;

    let (sequence, snapshot) = session.snapshot();
    Ok(Json(SessionDetail {
        id,
        sequence,
        snapshot,
    }))
}

/// Request to inject an event into a session
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub sender: String,
    pub event: CollabEvent,
}

/// Publish an event into an existing session, as if sent by `sender`
pub async fn publish_event(
    State(state): State<Arc<RelayState>>,
    Path(id): Path<String>,
    Json(request): Json<PublishRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let result = match state.session(&id).await {
        Some(session) => session.publish(None, &request.sender, request.event),
        None => Err(RelayError::SessionNotFound(id.clone())),
    };
    let sequence = result.map_err(|e| (e.status_code(), e.to_string()))?;

    Ok(Json(serde_json::json!({
        "success": true,
        "session_id": id,
        "sequence": sequence
    })))
}

/// Get relay status
pub async fn get_status(State(state): State<Arc<RelayState>>) -> Json<serde_json::Value> {
    let summaries = state.summaries().await;
    let participants: usize = summaries.iter().map(|s| s.participants).sum();
    let connections: usize = summaries.iter().map(|s| s.connections).sum();

    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.uptime().num_seconds(),
        "sessions": summaries.len(),
        "participants": participants,
        "connections": connections,
        "auth_required": state.config.server.token.is_some()
    }))
}
