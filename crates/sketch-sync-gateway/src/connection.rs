//! WebSocket connection lifecycle: snapshot, read/write loops, cleanup.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use sketch_sync_core::protocol::SyncMessage;

use crate::state::GatewayState;

/// Handle a new WebSocket connection.
pub async fn handle_ws_connection(state: Arc<GatewayState>, ws: WebSocket) {
    let conn_id = Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, "New WebSocket connection");

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<String>();

    // The snapshot is queued before the channel is registered, so it always
    // precedes any broadcast on this connection.
    if let Err(e) = state.sync.join(&conn_id, event_tx).await {
        error!(conn_id = %conn_id, %e, "Failed to send initial snapshot");
        let _ = ws_tx.send(Message::Close(None)).await;
        return;
    }

    let send_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = event_rx.recv().await {
            if ws_tx.send(Message::Text(msg.into())).await.is_err() {
                debug!(conn_id = %send_conn_id, "Socket closed while sending");
                break;
            }
        }
    });

    while let Some(msg_result) = ws_rx.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match SyncMessage::from_json(text.as_str()) {
                Ok(msg) => {
                    if let Err(e) = state.sync.handle_client_message(&conn_id, msg).await {
                        warn!(conn_id = %conn_id, %e, "Rejected client message");
                    }
                }
                Err(e) => {
                    warn!(conn_id = %conn_id, %e, "Invalid frame received");
                }
            },
            Ok(Message::Ping(_)) => {
                // Axum handles ping/pong automatically
            }
            Ok(Message::Close(_)) => {
                debug!(conn_id = %conn_id, "Client requested close");
                break;
            }
            Err(e) => {
                error!(conn_id = %conn_id, %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    send_task.abort();
    state.sync.leave(&conn_id).await;
    info!(conn_id = %conn_id, "WebSocket connection closed");
}
