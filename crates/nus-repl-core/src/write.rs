//! Serialized writes to the device.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::{error::TransportError, link::Connection};

/// Sends outbound chunks one at a time.
///
/// A second `send` waits until the first has been acknowledged, which
/// throttles the input side to the speed of the link.
#[derive(Debug)]
pub struct WriteChannel {
    connection: Arc<Connection>,
    gate: Mutex<()>,
}

impl WriteChannel {
    /// Create a write channel over a connection.
    #[must_use]
    pub fn new(connection: Arc<Connection>) -> Self {
        Self {
            connection,
            gate: Mutex::new(()),
        }
    }

    /// The connection this channel writes to.
    #[must_use]
    pub const fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Transmit one chunk and wait for the acknowledgement.
    ///
    /// # Errors
    /// Returns [`TransportError::NotConnected`] if the link is gone,
    /// [`TransportError::Oversized`] if the chunk exceeds the payload size,
    /// or whatever the link reports for a failed write. Nothing is retried.
    pub async fn send(&self, chunk: &[u8]) -> Result<(), TransportError> {
        let _in_flight = self.gate.lock().await;

        if !self.connection.is_alive() {
            return Err(TransportError::NotConnected);
        }
        let max = self.connection.payload_size().get();
        if chunk.len() > max {
            return Err(TransportError::Oversized {
                len: chunk.len(),
                max,
            });
        }

        tracing::trace!(len = chunk.len(), "Writing chunk");
        self.connection.write(chunk).await.inspect_err(|e| {
            tracing::debug!("Write rejected by link: {e}");
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{frame::PayloadSize, testing::MockLink};

    #[tokio::test]
    async fn test_send_reaches_link() {
        let link = MockLink::new(None);
        let channel = WriteChannel::new(Arc::new(Connection::new(link.clone(), None)));

        channel.send(b"ls").await.unwrap();
        channel.send(b"\n").await.unwrap();

        assert_eq!(link.written(), vec![b"ls".to_vec(), b"\n".to_vec()]);
    }

    #[tokio::test]
    async fn test_concurrent_sends_never_overlap() {
        let link = MockLink::new(None).with_write_delay(Duration::from_millis(5));
        let channel = Arc::new(WriteChannel::new(Arc::new(Connection::new(
            link.clone(),
            None,
        ))));

        let mut handles = Vec::new();
        for i in 0..8u8 {
            let channel = Arc::clone(&channel);
            handles.push(tokio::spawn(async move { channel.send(&[i]).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(link.written().len(), 8);
        assert_eq!(link.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let link = MockLink::new(None);
        let conn = Arc::new(Connection::new(link.clone(), None));
        let channel = WriteChannel::new(Arc::clone(&conn));

        conn.close().await;
        assert!(matches!(
            channel.send(b"x").await,
            Err(TransportError::NotConnected)
        ));
        assert!(link.written().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_chunk_rejected() {
        let link = MockLink::new(None);
        let conn = Connection::new(link.clone(), PayloadSize::new(2));
        let channel = WriteChannel::new(Arc::new(conn));

        let err = channel.send(b"abc").await.unwrap_err();
        assert!(matches!(err, TransportError::Oversized { len: 3, max: 2 }));
    }

    #[tokio::test]
    async fn test_link_failure_propagates() {
        let link = MockLink::new(None).fail_writes_after(1);
        let channel = WriteChannel::new(Arc::new(Connection::new(link.clone(), None)));

        channel.send(b"a").await.unwrap();
        assert!(matches!(
            channel.send(b"b").await,
            Err(TransportError::Write(_))
        ));
        assert_eq!(link.written(), vec![b"a".to_vec()]);
    }
}
