//! The BLE link seam and the connection that owns it.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use tokio::sync::watch;
use uuid::Uuid;

use crate::{
    error::{ConnectionError, TransportError},
    frame::PayloadSize,
    notify::NotifySender,
};

/// Nordic UART Service UUID.
pub const NUS_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e_24dc_ca9e);
/// NUS RX characteristic: the host writes here.
pub const NUS_RX_CHAR_UUID: Uuid = Uuid::from_u128(0x6e40_0002_b5a3_f393_e0a9_e50e_24dc_ca9e);
/// NUS TX characteristic: the device notifies here.
pub const NUS_TX_CHAR_UUID: Uuid = Uuid::from_u128(0x6e40_0003_b5a3_f393_e0a9_e50e_24dc_ca9e);

/// What the collaborator learned while setting up the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    /// Characteristic written by the host.
    pub write_char: Uuid,
    /// Characteristic notified by the device.
    pub notify_char: Uuid,
    /// Usable write payload, if the stack reports one.
    pub max_payload: Option<usize>,
    /// Human-readable device label (name or address).
    pub peer: String,
}

impl LinkInfo {
    /// Link info for the standard NUS characteristics.
    #[must_use]
    pub fn nus(peer: impl Into<String>, max_payload: Option<usize>) -> Self {
        Self {
            write_char: NUS_RX_CHAR_UUID,
            notify_char: NUS_TX_CHAR_UUID,
            max_payload,
            peer: peer.into(),
        }
    }
}

/// An established GATT link, as provided by the BLE stack.
#[async_trait]
pub trait GattLink: Send + Sync {
    /// Characteristics and limits of this link.
    fn info(&self) -> &LinkInfo;

    /// Write one chunk; resolves once the transport acknowledges it.
    async fn write(&self, chunk: &[u8]) -> Result<(), TransportError>;

    /// Tear the link down.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Discovers a device and establishes a link to it.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and subscribe to notifications.
    ///
    /// Every notification must be pushed into `notify`, in arrival order.
    /// Dropping every clone of `notify` signals that the link has ended.
    async fn connect(&self, notify: NotifySender) -> Result<Arc<dyn GattLink>, ConnectionError>;
}

/// One active link to the target device.
///
/// Shared by the write and notify channels. Closing happens at most once no
/// matter how many callers race to shut it down.
pub struct Connection {
    link: Arc<dyn GattLink>,
    payload: PayloadSize,
    alive: AtomicBool,
    closing: AtomicBool,
    closed_tx: watch::Sender<bool>,
}

impl Connection {
    /// Wrap a link, resolving its payload size.
    ///
    /// `limit` can only lower the size the link reports.
    #[must_use]
    pub fn new(link: Arc<dyn GattLink>, limit: Option<PayloadSize>) -> Self {
        let reported = PayloadSize::negotiated(link.info().max_payload);
        let payload = limit.map_or(reported, |l| l.min(reported));
        let (closed_tx, _) = watch::channel(false);
        Self {
            link,
            payload,
            alive: AtomicBool::new(true),
            closing: AtomicBool::new(false),
            closed_tx,
        }
    }

    /// Link characteristics.
    #[must_use]
    pub fn info(&self) -> &LinkInfo {
        self.link.info()
    }

    /// Negotiated maximum write payload.
    #[must_use]
    pub const fn payload_size(&self) -> PayloadSize {
        self.payload
    }

    /// Whether writes may still be issued.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Record that the link went away underneath us.
    pub fn mark_lost(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            tracing::debug!(peer = %self.info().peer, "Connection lost");
        }
        self.closed_tx.send_replace(true);
    }

    /// Subscribe to the end-of-connection signal.
    #[must_use]
    pub fn subscribe_closed(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    /// Resolves once the connection is closed or lost.
    pub async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    pub(crate) async fn write(&self, chunk: &[u8]) -> Result<(), TransportError> {
        self.link.write(chunk).await
    }

    /// Close the link.
    ///
    /// Only the first call reaches the link; it returns `true`. Later
    /// or concurrent calls return `false` immediately.
    pub async fn close(&self) -> bool {
        if self.closing.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.alive.store(false, Ordering::Release);
        self.closed_tx.send_replace(true);
        if let Err(e) = self.link.close().await {
            tracing::warn!(peer = %self.info().peer, "Failed to close link cleanly: {e}");
        } else {
            tracing::debug!(peer = %self.info().peer, "Link closed");
        }
        true
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("info", self.info())
            .field("payload", &self.payload)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLink;

    #[tokio::test]
    async fn test_close_reaches_link_once() {
        let link = MockLink::new(None);
        let conn = Arc::new(Connection::new(link.clone(), None));

        let (a, b) = tokio::join!(conn.close(), conn.close());
        assert!(a ^ b);
        assert!(!conn.close().await);
        assert_eq!(link.close_count(), 1);
        assert!(!conn.is_alive());
    }

    #[tokio::test]
    async fn test_payload_limit_only_lowers() {
        let link = MockLink::new(Some(100));
        let conn = Connection::new(link.clone(), PayloadSize::new(50));
        assert_eq!(conn.payload_size().get(), 50);

        let conn = Connection::new(link, PayloadSize::new(500));
        assert_eq!(conn.payload_size().get(), 100);
    }

    #[tokio::test]
    async fn test_unreported_payload_falls_back_to_minimum() {
        let conn = Connection::new(MockLink::new(None), None);
        assert_eq!(conn.payload_size(), PayloadSize::MIN);
    }

    #[tokio::test]
    async fn test_mark_lost_signals_watchers() {
        let conn = Connection::new(MockLink::new(None), None);
        let mut closed = conn.subscribe_closed();
        conn.mark_lost();
        closed.wait_for(|c| *c).await.unwrap();
        assert!(!conn.is_alive());
    }

    #[tokio::test]
    async fn test_closed_resolves_after_close() {
        let conn = Arc::new(Connection::new(MockLink::new(None), None));
        let waiter = tokio::spawn({
            let conn = Arc::clone(&conn);
            async move { conn.closed().await }
        });

        assert!(conn.close().await);
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        conn.closed().await;
    }

    #[test]
    fn test_nus_uuids() {
        assert_eq!(
            NUS_RX_CHAR_UUID.to_string(),
            "6e400002-b5a3-f393-e0a9-e50e24dcca9e"
        );
        assert_eq!(
            NUS_TX_CHAR_UUID.to_string(),
            "6e400003-b5a3-f393-e0a9-e50e24dcca9e"
        );
    }
}
