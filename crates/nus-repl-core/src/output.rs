//! BLE notifications to terminal output.

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::watch,
};

use crate::{
    error::{SessionError, SinkError},
    notify::NotifyChannel,
    session::cancelled,
};

/// Why the output pump stopped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputExit {
    /// The link ended.
    RemoteClosed,
    /// The session asked the pump to stop.
    Cancelled,
}

/// Copies inbound chunks to the output sink, byte for byte.
pub struct OutputPump<W> {
    sink: W,
    notify: NotifyChannel,
    shutdown: watch::Receiver<bool>,
}

impl<W> OutputPump<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Create a pump writing to `sink`.
    #[must_use]
    pub const fn new(sink: W, notify: NotifyChannel, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            sink,
            notify,
            shutdown,
        }
    }

    /// Run until the link ends, cancellation, or a sink failure.
    ///
    /// # Errors
    /// Returns [`SessionError::Sink`] when the sink rejects a write.
    pub async fn run(&mut self) -> Result<OutputExit, SessionError> {
        let result = self.pump().await;
        match &result {
            Ok(exit) => tracing::debug!(?exit, "Output pump stopped"),
            Err(e) => tracing::debug!("Output pump failed: {e}"),
        }
        result
    }

    async fn pump(&mut self) -> Result<OutputExit, SessionError> {
        loop {
            let chunk = tokio::select! {
                biased;
                () = cancelled(&mut self.shutdown) => return Ok(OutputExit::Cancelled),
                chunk = self.notify.next() => chunk,
            };
            let Ok(chunk) = chunk else {
                return Ok(OutputExit::RemoteClosed);
            };

            tracing::trace!(len = chunk.len(), "Received chunk");
            self.sink.write_all(&chunk).await.map_err(SinkError)?;
            self.sink.flush().await.map_err(SinkError)?;
        }
    }

    /// Unwrap the sink.
    pub fn into_sink(self) -> W {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use std::{io, sync::Arc};

    use tokio_test::io::Builder;

    use super::*;
    use crate::{
        link::Connection,
        notify::{NotifySender, notify_queue},
        testing::{FailingSink, MockLink},
    };

    fn notify(capacity: usize) -> (NotifySender, NotifyChannel) {
        let (tx, rx) = notify_queue(capacity);
        let conn = Arc::new(Connection::new(MockLink::new(None), None));
        (tx, NotifyChannel::new(rx, conn))
    }

    #[tokio::test]
    async fn test_chunks_written_verbatim() {
        let (tx, channel) = notify(8);
        let (_stop, rx) = watch::channel(false);
        tx.deliver(&b"Hel"[..]).await.unwrap();
        tx.deliver(&b"lo\r\n"[..]).await.unwrap();
        drop(tx);

        let mut pump = OutputPump::new(Vec::new(), channel, rx);
        assert_eq!(pump.run().await.unwrap(), OutputExit::RemoteClosed);
        assert_eq!(pump.into_sink(), b"Hello\r\n".to_vec());
    }

    #[tokio::test]
    async fn test_mock_sink_sees_each_chunk() {
        let (tx, channel) = notify(8);
        let (_stop, rx) = watch::channel(false);
        tx.deliver(&b">>> "[..]).await.unwrap();
        tx.deliver(&b"\x1b[K"[..]).await.unwrap();
        drop(tx);

        let sink = Builder::new().write(b">>> ").write(b"\x1b[K").build();
        let mut pump = OutputPump::new(sink, channel, rx);
        assert_eq!(pump.run().await.unwrap(), OutputExit::RemoteClosed);
    }

    #[tokio::test]
    async fn test_sink_failure_is_fatal() {
        let (tx, channel) = notify(8);
        let (_stop, rx) = watch::channel(false);
        tx.deliver(&b"x"[..]).await.unwrap();

        let mut pump = OutputPump::new(FailingSink::new(io::ErrorKind::BrokenPipe), channel, rx);
        let err = pump.run().await.unwrap_err();
        assert!(matches!(err, SessionError::Sink(SinkError(ref e)) if e.kind() == io::ErrorKind::BrokenPipe));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting() {
        let (_tx, channel) = notify(8);
        let (stop, rx) = watch::channel(false);
        let mut pump = OutputPump::new(Vec::new(), channel, rx);

        stop.send_replace(true);
        assert_eq!(pump.run().await.unwrap(), OutputExit::Cancelled);
    }
}
