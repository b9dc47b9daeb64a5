//! Inbound notifications as an ordered, bounded queue.
//!
//! The BLE stack pushes each notification into a [`NotifySender`]; the
//! output side pulls them back out with [`NotifyChannel::next`]. A full
//! queue suspends the producer, so a slow terminal throttles the link
//! instead of growing memory.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::{error::ConnectionClosed, link::Connection};

/// Default number of queued notifications.
pub const DEFAULT_NOTIFY_QUEUE: usize = 64;

/// Producer half, handed to the BLE collaborator.
#[derive(Debug, Clone)]
pub struct NotifySender {
    tx: mpsc::Sender<Bytes>,
}

impl NotifySender {
    /// Queue one notification, waiting for room.
    ///
    /// # Errors
    /// Returns [`ConnectionClosed`] if the consumer is gone.
    pub async fn deliver(&self, chunk: impl Into<Bytes>) -> Result<(), ConnectionClosed> {
        self.tx.send(chunk.into()).await.map_err(|_| ConnectionClosed)
    }

    /// Queue one notification without waiting.
    ///
    /// Returns the chunk back if the queue is full.
    ///
    /// # Errors
    /// Returns [`ConnectionClosed`] if the consumer is gone.
    pub fn try_deliver(&self, chunk: impl Into<Bytes>) -> Result<Option<Bytes>, ConnectionClosed> {
        match self.tx.try_send(chunk.into()) {
            Ok(()) => Ok(None),
            Err(mpsc::error::TrySendError::Full(chunk)) => Ok(Some(chunk)),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ConnectionClosed),
        }
    }

    /// Whether the consumer has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create a bounded notification queue.
///
/// The receiver is turned into a [`NotifyChannel`] once the connection
/// exists.
#[must_use]
pub fn notify_queue(capacity: usize) -> (NotifySender, mpsc::Receiver<Bytes>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (NotifySender { tx }, rx)
}

/// Consumer half: awaits inbound chunks in arrival order.
pub struct NotifyChannel {
    rx: mpsc::Receiver<Bytes>,
    connection: Arc<Connection>,
    closed_rx: watch::Receiver<bool>,
    ended: bool,
}

impl NotifyChannel {
    /// Bind a queue receiver to its connection.
    #[must_use]
    pub fn new(rx: mpsc::Receiver<Bytes>, connection: Arc<Connection>) -> Self {
        let closed_rx = connection.subscribe_closed();
        Self {
            rx,
            connection,
            closed_rx,
            ended: false,
        }
    }

    /// Wait for the next inbound chunk.
    ///
    /// Chunks already queued are returned before the end is reported.
    ///
    /// # Errors
    /// Returns [`ConnectionClosed`] once the link has ended, on this
    /// and every later call.
    pub async fn next(&mut self) -> Result<Bytes, ConnectionClosed> {
        if self.ended {
            return self.rx.try_recv().map_err(|_| ConnectionClosed);
        }

        tokio::select! {
            biased;
            chunk = self.rx.recv() => {
                if let Some(chunk) = chunk {
                    Ok(chunk)
                } else {
                    self.ended = true;
                    self.connection.mark_lost();
                    Err(ConnectionClosed)
                }
            }
            _ = self.closed_rx.wait_for(|closed| *closed) => {
                self.ended = true;
                self.rx.try_recv().map_err(|_| ConnectionClosed)
            }
        }
    }
}

impl std::fmt::Debug for NotifyChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyChannel")
            .field("ended", &self.ended)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::MockLink;

    fn channel(capacity: usize) -> (NotifySender, NotifyChannel, Arc<Connection>) {
        let (tx, rx) = notify_queue(capacity);
        let conn = Arc::new(Connection::new(MockLink::new(None), None));
        (tx, NotifyChannel::new(rx, Arc::clone(&conn)), conn)
    }

    #[tokio::test]
    async fn test_chunks_arrive_in_order() {
        let (tx, mut notify, _conn) = channel(8);
        tx.deliver(&b"Hel"[..]).await.unwrap();
        tx.deliver(&b"lo\n"[..]).await.unwrap();

        assert_eq!(notify.next().await.unwrap(), Bytes::from_static(b"Hel"));
        assert_eq!(notify.next().await.unwrap(), Bytes::from_static(b"lo\n"));
    }

    #[tokio::test]
    async fn test_empty_notification_is_one_chunk() {
        let (tx, mut notify, _conn) = channel(8);
        tx.deliver(Bytes::new()).await.unwrap();
        assert_eq!(notify.next().await.unwrap(), Bytes::new());
    }

    #[tokio::test]
    async fn test_dropped_sender_drains_then_closes() {
        let (tx, mut notify, conn) = channel(8);
        tx.deliver(&b"bye"[..]).await.unwrap();
        drop(tx);

        assert_eq!(notify.next().await.unwrap(), Bytes::from_static(b"bye"));
        assert_eq!(notify.next().await, Err(ConnectionClosed));
        assert_eq!(notify.next().await, Err(ConnectionClosed));
        assert!(!conn.is_alive());
    }

    #[tokio::test]
    async fn test_pending_next_resolves_on_close() {
        let (tx, mut notify, conn) = channel(8);
        let waiter = tokio::spawn(async move { notify.next().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(conn.close().await);

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(ConnectionClosed));
        drop(tx);
    }

    #[tokio::test]
    async fn test_full_queue_reports_back() {
        let (tx, mut notify, _conn) = channel(1);
        assert_eq!(tx.try_deliver(&b"a"[..]).unwrap(), None);
        assert_eq!(
            tx.try_deliver(&b"b"[..]).unwrap(),
            Some(Bytes::from_static(b"b"))
        );
        assert_eq!(notify.next().await.unwrap(), Bytes::from_static(b"a"));
    }

    #[tokio::test]
    async fn test_deliver_fails_once_consumer_dropped() {
        let (tx, notify, _conn) = channel(4);
        drop(notify);
        assert!(tx.is_closed());
        assert_eq!(tx.deliver(&b"x"[..]).await, Err(ConnectionClosed));
    }
}
