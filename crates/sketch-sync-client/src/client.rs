//! WebSocket sync client with fixed-delay reconnect.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sketch_sync_core::config::ClientConfig;
use sketch_sync_core::protocol::SyncMessage;

use crate::error::{ClientError, Result};
use crate::reconcile::{LocalEdit, Reconciler, SceneEvent};
use crate::scene::SceneElement;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

enum SessionEnd {
    Cancelled,
    Closed,
}

/// Handle to a running client task.
pub struct SyncClient {
    reconciler: Arc<RwLock<Reconciler>>,
    edits: mpsc::UnboundedSender<LocalEdit>,
    cancel: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl SyncClient {
    /// Spawn the connection task. Scene events arrive on the returned
    /// receiver, remote and local alike.
    pub fn spawn(config: ClientConfig) -> (Self, mpsc::UnboundedReceiver<SceneEvent>) {
        let reconciler = Arc::new(RwLock::new(Reconciler::new()));
        let (edits_tx, edits_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let runner = Runner {
            config,
            reconciler: reconciler.clone(),
            edits: edits_rx,
            events: events_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(runner.run());

        (
            Self {
                reconciler,
                edits: edits_tx,
                cancel,
                task,
            },
            events_rx,
        )
    }

    /// Queue a local edit. It is applied and sent once a session is up and
    /// its snapshot has been applied.
    pub fn submit(&self, edit: LocalEdit) -> Result<()> {
        self.edits
            .send(edit)
            .map_err(|_| ClientError::Transport("client task has stopped".into()))
    }

    /// Current scene, cloned.
    pub async fn scene(&self) -> Vec<SceneElement> {
        self.reconciler.read().await.scene().elements().to_vec()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the task and wait for it.
    pub async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        self.join().await
    }

    /// Wait for the task to end on its own (cancelled or out of attempts).
    pub async fn join(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| ClientError::Transport(format!("client task failed: {e}")))?
    }
}

struct Runner {
    config: ClientConfig,
    reconciler: Arc<RwLock<Reconciler>>,
    edits: mpsc::UnboundedReceiver<LocalEdit>,
    events: mpsc::UnboundedSender<SceneEvent>,
    cancel: CancellationToken,
}

impl Runner {
    async fn run(mut self) -> Result<()> {
        let delay = Duration::from_millis(self.config.reconnect_delay_ms);
        let mut failures: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            match connect_async(self.config.url.as_str()).await {
                Ok((ws, _)) => {
                    info!(url = %self.config.url, "Connected");
                    failures = 0;
                    match self.session(ws).await {
                        Ok(SessionEnd::Cancelled) => return Ok(()),
                        Ok(SessionEnd::Closed) => info!("Server closed the connection"),
                        Err(e) => warn!(%e, "Session ended with error"),
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(url = %self.config.url, attempt = failures, %e, "Connect failed");
                    if let Some(max) = self.config.max_reconnect_attempts {
                        if failures >= max {
                            return Err(ClientError::ReconnectExhausted { attempts: failures });
                        }
                    }
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn session(&mut self, ws: WsStream) -> Result<SessionEnd> {
        let (mut ws_tx, mut ws_rx) = ws.split();
        // Local edits wait until this session's snapshot has been applied.
        let mut synced = false;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Cancelled);
                }
                edit = self.edits.recv(), if synced => {
                    let Some(edit) = edit else {
                        return Ok(SessionEnd::Cancelled);
                    };
                    let events = match self.reconciler.write().await.local_edit(edit) {
                        Ok(events) => events,
                        Err(e) => {
                            warn!(%e, "Dropping local edit");
                            continue;
                        }
                    };
                    for event in events {
                        if let Some(frame) = Reconciler::outbound(&event) {
                            ws_tx.send(Message::Text(frame.to_json()?.into())).await?;
                        }
                        let _ = self.events.send(event);
                    }
                }
                frame = ws_rx.next() => match frame {
                    Some(Ok(Message::Text(text))) => match SyncMessage::from_json(text.as_str()) {
                        Ok(msg) => {
                            debug!(event = msg.kind(), "Received");
                            synced |= matches!(msg, SyncMessage::InitialElements { .. });
                            let events = self.reconciler.write().await.apply(msg);
                            for event in events {
                                let _ = self.events.send(event);
                            }
                        }
                        Err(e) => warn!(%e, "Ignoring malformed frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Closed),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                },
            }
        }
    }
}
