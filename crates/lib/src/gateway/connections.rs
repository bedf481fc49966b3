//! Connection table: route serialized events to open WebSocket connections by id.
//!
//! Each connection task owns the receiving half of a bounded queue; the table holds the
//! sending half. Delivery never waits: a recipient whose queue is full or closed misses
//! the event and everyone else still gets it.

use super::protocol::ServerEvent;
use crate::registry::ConnectionId;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

/// Why a frame could not be queued for a connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("connection {0} is not registered")]
    Unknown(ConnectionId),

    #[error("outbound queue for {0} is full")]
    Full(ConnectionId),

    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}

/// Outcome of a broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: usize,
}

/// Registry of connection ids to outbound queues. Shared across gateway.
pub struct ConnectionTable {
    inner: Arc<RwLock<HashMap<ConnectionId, mpsc::Sender<String>>>>,
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register(&self, id: ConnectionId, tx: mpsc::Sender<String>) {
        let mut g = self.inner.write().await;
        if g.insert(id.clone(), tx).is_some() {
            log::warn!("connection id {} registered twice; replaced", id);
        }
    }

    pub async fn unregister(&self, id: &str) {
        self.inner.write().await.remove(id);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Queue one event for one connection.
    pub async fn send(&self, id: &str, event: &ServerEvent) -> Result<(), SendError> {
        let text = event.to_json();
        let g = self.inner.read().await;
        Self::try_queue(&g, id, text)
    }

    /// Queue one event for every listed connection. Failures are logged and counted, never retried.
    pub async fn broadcast(&self, recipients: &[ConnectionId], event: &ServerEvent) -> Delivery {
        let mut delivery = Delivery::default();
        if recipients.is_empty() {
            return delivery;
        }
        let text = event.to_json();
        let g = self.inner.read().await;
        for id in recipients {
            match Self::try_queue(&g, id, text.clone()) {
                Ok(()) => delivery.delivered += 1,
                Err(e) => {
                    log::warn!("dropping {} event: {}", event.name(), e);
                    delivery.dropped += 1;
                }
            }
        }
        delivery
    }

    fn try_queue(
        table: &HashMap<ConnectionId, mpsc::Sender<String>>,
        id: &str,
        text: String,
    ) -> Result<(), SendError> {
        let tx = table
            .get(id)
            .ok_or_else(|| SendError::Unknown(id.to_string()))?;
        tx.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full(id.to_string()),
            mpsc::error::TrySendError::Closed(_) => SendError::Closed(id.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn left(id: &str) -> ServerEvent {
        ServerEvent::PeerLeft {
            peer_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn send_reaches_registered_connection() {
        let table = ConnectionTable::new();
        let (tx, mut rx) = mpsc::channel(4);
        table.register("c1".into(), tx).await;

        table.send("c1", &left("p9")).await.unwrap();
        let frame: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["event"], "peer_left");
        assert_eq!(frame["payload"]["peer_id"], "p9");

        assert_eq!(
            table.send("nope", &left("p9")).await,
            Err(SendError::Unknown("nope".into()))
        );
    }

    #[tokio::test]
    async fn broadcast_skips_failed_recipients() {
        let table = ConnectionTable::new();
        let (tx_full, _rx_full) = mpsc::channel(1);
        let (tx_closed, rx_closed) = mpsc::channel(1);
        let (tx_ok, mut rx_ok) = mpsc::channel(4);
        table.register("full".into(), tx_full).await;
        table.register("closed".into(), tx_closed).await;
        table.register("ok".into(), tx_ok).await;
        drop(rx_closed);

        table.send("full", &left("warmup")).await.unwrap();

        let recipients = vec![
            "full".to_string(),
            "closed".to_string(),
            "gone".to_string(),
            "ok".to_string(),
        ];
        let delivery = table.broadcast(&recipients, &left("p1")).await;
        assert_eq!(
            delivery,
            Delivery {
                delivered: 1,
                dropped: 3
            }
        );
        assert!(rx_ok.recv().await.unwrap().contains("\"p1\""));
    }

    #[tokio::test]
    async fn unregistered_connection_no_longer_receives() {
        let table = ConnectionTable::new();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, _rx2) = mpsc::channel(4);
        table.register("c1".into(), tx1).await;
        table.register("c2".into(), tx2).await;
        assert_eq!(table.len().await, 2);

        table.unregister("c2").await;
        let recipients = vec!["c1".to_string(), "c2".to_string()];
        let delivery = table.broadcast(&recipients, &ServerEvent::Shutdown).await;
        assert_eq!(
            delivery,
            Delivery {
                delivered: 1,
                dropped: 1
            }
        );
        assert!(rx1.recv().await.unwrap().contains("shutdown"));

        table.unregister("c1").await;
        assert_eq!(table.len().await, 0);
    }
}
