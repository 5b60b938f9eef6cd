//! Broadcast hub: the registry of connected channels.
//!
//! Each channel is the sending half of a per-connection queue; the
//! connection task drains it into the socket. Delivery is best effort: a
//! channel whose receiver is gone is pruned on the next broadcast.

use std::collections::HashMap;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error};

use sketch_sync_core::protocol::SyncMessage;

pub type ChannelTx = mpsc::UnboundedSender<String>;

#[derive(Default)]
pub struct BroadcastHub {
    connections: RwLock<HashMap<String, ChannelTx>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel. Replaces any channel already registered under
    /// `conn_id`; returns `false` in that case.
    pub async fn join(&self, conn_id: &str, tx: ChannelTx) -> bool {
        let mut connections = self.connections.write().await;
        let fresh = connections.insert(conn_id.to_string(), tx).is_none();
        #[cfg(feature = "metrics")]
        crate::metrics::record_ws_connections(connections.len());
        debug!(conn_id, fresh, "Channel joined");
        fresh
    }

    /// Remove a channel. Anything still queued for it is dropped.
    pub async fn leave(&self, conn_id: &str) -> bool {
        let mut connections = self.connections.write().await;
        let removed = connections.remove(conn_id).is_some();
        if removed {
            #[cfg(feature = "metrics")]
            crate::metrics::record_ws_connections(connections.len());
            debug!(conn_id, "Channel left");
        }
        removed
    }

    /// Send to every channel. Returns how many accepted the message.
    pub async fn broadcast(&self, msg: &SyncMessage) -> usize {
        self.fan_out(None, msg).await
    }

    /// Send to every channel except `exclude`.
    pub async fn broadcast_except(&self, exclude: &str, msg: &SyncMessage) -> usize {
        self.fan_out(Some(exclude), msg).await
    }

    /// Send to a single channel.
    pub async fn send_to(&self, conn_id: &str, msg: &SyncMessage) -> bool {
        let Some(text) = encode(msg) else {
            return false;
        };
        self.connections
            .read()
            .await
            .get(conn_id)
            .is_some_and(|tx| tx.send(text).is_ok())
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    async fn fan_out(&self, exclude: Option<&str>, msg: &SyncMessage) -> usize {
        let Some(text) = encode(msg) else {
            return 0;
        };

        let mut connections = self.connections.write().await;
        let before = connections.len();
        let mut sent = 0;
        connections.retain(|conn_id, tx| {
            if exclude == Some(conn_id.as_str()) {
                return true;
            }
            if tx.send(text.clone()).is_ok() {
                sent += 1;
                true
            } else {
                debug!(conn_id, "Pruning closed channel");
                false
            }
        });

        let pruned = before - connections.len();
        #[cfg(feature = "metrics")]
        {
            if pruned > 0 {
                crate::metrics::record_ws_connections(connections.len());
            }
            crate::metrics::record_broadcast(msg.kind());
        }
        debug!(event = msg.kind(), sent, pruned, "Broadcast event");
        sent
    }
}

fn encode(msg: &SyncMessage) -> Option<String> {
    match msg.to_json() {
        Ok(text) => Some(text),
        Err(e) => {
            error!(%e, event = msg.kind(), "Failed to serialize event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (ChannelTx, mpsc::UnboundedReceiver<String>) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone() {
        let hub = BroadcastHub::new();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        hub.join("a", tx1).await;
        hub.join("b", tx2).await;

        let sent = hub.broadcast(&SyncMessage::cleared()).await;
        assert_eq!(sent, 2);
        assert!(rx1.recv().await.unwrap().contains("canvas_cleared"));
        assert!(rx2.recv().await.unwrap().contains("canvas_cleared"));
    }

    #[tokio::test]
    async fn test_broadcast_except_skips_originator() {
        let hub = BroadcastHub::new();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        hub.join("origin", tx1).await;
        hub.join("other", tx2).await;

        assert_eq!(hub.broadcast_except("origin", &SyncMessage::deleted("x")).await, 1);
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_closed_channels_are_pruned() {
        let hub = BroadcastHub::new();
        let (tx, rx) = channel();
        hub.join("gone", tx).await;
        drop(rx);

        assert_eq!(hub.broadcast(&SyncMessage::cleared()).await, 0);
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_rejoin_and_pruned_channels_keep_count_exact() {
        let hub = BroadcastHub::new();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        assert!(hub.join("a", tx1).await);
        assert!(!hub.join("a", tx2).await);
        assert_eq!(hub.connection_count().await, 1);

        let (tx, rx) = channel();
        assert!(hub.join("gone", tx).await);
        drop(rx);
        hub.broadcast(&SyncMessage::cleared()).await;
        assert_eq!(hub.connection_count().await, 1);
        assert!(!hub.leave("gone").await);
        assert!(hub.leave("a").await);
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_leave_and_send_to() {
        let hub = BroadcastHub::new();
        let (tx, mut rx) = channel();
        hub.join("a", tx).await;
        assert!(hub.send_to("a", &SyncMessage::sync_status(3)).await);
        assert!(rx.recv().await.unwrap().contains("\"count\":3"));

        assert!(hub.leave("a").await);
        assert!(!hub.leave("a").await);
        assert!(!hub.send_to("a", &SyncMessage::cleared()).await);
    }
}
