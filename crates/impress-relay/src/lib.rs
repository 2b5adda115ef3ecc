//! Impress Relay - real-time session server
//!
//! Fans presence, cursor, whiteboard and document events out to everyone in
//! a session over WebSocket, keeping a mirror of each session's state so
//! late joiners start from a snapshot.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod session;
#[cfg(unix)]
pub mod socket;
pub mod websocket;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use impress_collab::ServerMessage;

pub use client::{ClientConfig, ConnectionState, EventHandlers, ReconnectPolicy, RelayClient};
pub use config::RelayConfig;
pub use error::{ClientError, ConfigError, RelayError};
pub use session::{Broadcast, Session, SessionHandle, SessionSummary};

/// Shared application state
pub struct RelayState {
    pub config: RelayConfig,
    sessions: RwLock<HashMap<String, SessionHandle>>,
    started_at: DateTime<Utc>,
}

impl RelayState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            started_at: Utc::now(),
        }
    }

    /// Join a session, creating it on first use.
    ///
    /// Runs under the registry write lock so a session cannot be dropped
    /// between lookup and join.
    pub async fn join(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> (SessionHandle, ServerMessage, broadcast::Receiver<Broadcast>) {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::info!(session = %session_id, "Creating session");
                Arc::new(Session::new(
                    session_id,
                    self.config.session.broadcast_capacity,
                    self.config.session.enforce_roles,
                ))
            })
            .clone();
        let (welcome, rx) = session.join(user_id);
        (session, welcome, rx)
    }

    /// Drop one connection of `user_id`, removing the session once empty
    /// unless configured to keep it.
    pub async fn disconnect(&self, session_id: &str, user_id: &str) {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get(session_id) else {
            return;
        };
        let empty = session.leave(user_id);
        if empty && !self.config.session.keep_empty_sessions {
            sessions.remove(session_id);
            tracing::info!(session = %session_id, "Dropped empty session");
        }
    }

    pub async fn session(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Summaries of all sessions, sorted by id
    pub async fn summaries(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.read().await;
        let mut summaries: Vec<_> = sessions.values().map(|s| s.summary()).collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    /// Run one idle sweep over every session
    pub async fn sweep_idle(&self) -> usize {
        let threshold = self.config.idle_threshold();
        let sessions: Vec<SessionHandle> = self.sessions.read().await.values().cloned().collect();
        sessions.iter().map(|s| s.sweep_idle(threshold)).sum()
    }

    pub fn uptime(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }
}

/// Periodically mark idle participants inactive
pub fn spawn_idle_sweeper(state: Arc<RelayState>) -> JoinHandle<()> {
    let period = Duration::from_secs(state.config.session.idle_sweep_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let swept = state.sweep_idle().await;
            if swept > 0 {
                tracing::debug!("Marked {} participants inactive", swept);
            }
        }
    })
}

/// Create the relay router
pub fn create_router(state: Arc<RelayState>) -> Router {
    Router::new()
        // Session endpoints
        .route("/sessions", get(http::list_sessions))
        .route("/sessions/{id}", get(http::get_session))
        .route("/sessions/{id}/events", post(http::publish_event))
        // WebSocket
        .route("/sessions/{id}/ws", get(websocket::ws_handler))
        // System endpoints
        .route("/status", get(http::get_status))
        // Middleware
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve on an already bound listener until `shutdown` resolves
pub async fn serve_listener<F>(
    listener: TcpListener,
    state: Arc<RelayState>,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);
    tracing::info!("Impress relay listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
