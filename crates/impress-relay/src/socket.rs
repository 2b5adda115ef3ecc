//! Unix domain socket admin endpoint
//!
//! Newline-delimited JSON-RPC for local inspection of a running relay.

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::RelayState;

/// Start the Unix socket server
pub async fn serve_unix_socket(
    path: impl AsRef<Path>,
    state: Arc<RelayState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Remove stale socket file
    let path = path.as_ref();
    if path.exists() {
        std::fs::remove_file(path)?;
    }

    let listener = UnixListener::bind(path)?;
    tracing::info!("Admin socket listening on {:?}", path);

    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(e) = handle_unix_connection(stream, state).await {
                        tracing::error!("Admin socket connection error: {}", e);
                    }
                });
            }
            Err(e) => {
                tracing::error!("Admin socket accept error: {}", e);
            }
        }
    }
}

async fn handle_unix_connection(
    stream: UnixStream,
    state: Arc<RelayState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<serde_json::Value>(&line) {
            Ok(request) => handle_request(&request, &state).await,
            Err(e) => serde_json::json!({
                "id": null,
                "error": { "code": -32700, "message": format!("Parse error: {}", e) }
            }),
        };
        let response_str = serde_json::to_string(&response)? + "\n";
        writer.write_all(response_str.as_bytes()).await?;
        line.clear();
    }

    Ok(())
}

/// Handle one admin request
pub async fn handle_request(request: &serde_json::Value, state: &RelayState) -> serde_json::Value {
    let method = request.get("method").and_then(|m| m.as_str());
    let id = request
        .get("id")
        .cloned()
        .unwrap_or(serde_json::Value::Null);

    match method {
        Some("status") => {
            let summaries = state.summaries().await;
            serde_json::json!({
                "id": id,
                "result": {
                    "sessions": summaries.len(),
                    "connections": summaries.iter().map(|s| s.connections).sum::<usize>(),
                    "uptime_secs": state.uptime().num_seconds()
                }
            })
        }
        Some("sessions.list") => serde_json::json!({
            "id": id,
            "result": state.summaries().await
        }),
        Some("sessions.snapshot") => {
            let session_id = request
                .get("params")
                .and_then(|p| p.get("session_id"))
                .and_then(|s| s.as_str())
                .unwrap_or_default();

            match state.session(session_id).await {
                Some(session) => {
                    let (sequence, snapshot) = session.snapshot();
                    serde_json::json!({
                        "id": id,
                        "result": { "sequence": sequence, "snapshot": snapshot }
                    })
                }
                None => serde_json::json!({
                    "id": id,
                    "error": { "code": -32602, "message": format!("Unknown session: {}", session_id) }
                }),
            }
        }
        _ => serde_json::json!({
            "id": id,
            "error": { "code": -32601, "message": "Method not found" }
        }),
    }
}
