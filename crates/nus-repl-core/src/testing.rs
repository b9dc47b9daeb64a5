//! In-memory doubles for the link, connector, terminal, and sink.
//!
//! Enabled for this crate's tests and, for other crates, with the
//! `testing` feature.

use std::{
    collections::VecDeque,
    io,
    pin::Pin,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWrite;

use crate::{
    error::{ConnectionError, TransportError},
    input::InputSource,
    link::{Connector, GattLink, LinkInfo},
    notify::NotifySender,
    terminal::RawMode,
};

/// Recording [`GattLink`] that checks writes never overlap.
pub struct MockLink {
    info: LinkInfo,
    written: Mutex<Vec<Vec<u8>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    closes: AtomicUsize,
    write_delay: Mutex<Option<Duration>>,
    fail_after: Mutex<Option<usize>>,
}

impl MockLink {
    /// A NUS link reporting `max_payload`.
    #[must_use]
    pub fn new(max_payload: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            info: LinkInfo::nus("mock", max_payload),
            written: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            write_delay: Mutex::new(None),
            fail_after: Mutex::new(None),
        })
    }

    /// Make every write take `delay` before it is acknowledged.
    pub fn with_write_delay(self: &Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.write_delay.lock().unwrap() = Some(delay);
        Arc::clone(self)
    }

    /// Accept `n` writes, then fail every later one.
    pub fn fail_writes_after(self: &Arc<Self>, n: usize) -> Arc<Self> {
        *self.fail_after.lock().unwrap() = Some(n);
        Arc::clone(self)
    }

    /// Chunks written so far, in order.
    #[must_use]
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().unwrap().clone()
    }

    /// All written bytes concatenated.
    #[must_use]
    pub fn written_bytes(&self) -> Vec<u8> {
        self.written().concat()
    }

    /// Highest number of writes ever outstanding at once.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Number of times `close` reached the link.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GattLink for MockLink {
    fn info(&self) -> &LinkInfo {
        &self.info
    }

    async fn write(&self, chunk: &[u8]) -> Result<(), TransportError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.write_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }

        let result = {
            let mut written = self.written.lock().unwrap();
            match *self.fail_after.lock().unwrap() {
                Some(n) if written.len() >= n => {
                    Err(TransportError::Write("injected failure".into()))
                }
                _ => {
                    written.push(chunk.to_vec());
                    Ok(())
                }
            }
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// [`Connector`] handing out a single [`MockLink`].
///
/// Keeps the notification sender so tests can play the device.
#[derive(Clone)]
pub struct MockConnector {
    link: Arc<MockLink>,
    notify: Arc<Mutex<Option<NotifySender>>>,
    reachable: bool,
}

impl MockConnector {
    /// A connector whose link reports `max_payload`.
    #[must_use]
    pub fn new(max_payload: Option<usize>) -> Self {
        Self {
            link: MockLink::new(max_payload),
            notify: Arc::new(Mutex::new(None)),
            reachable: true,
        }
    }

    /// A connector that never finds the device.
    #[must_use]
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::new(None)
        }
    }

    /// The link handed out by `connect`.
    #[must_use]
    pub fn link(&self) -> Arc<MockLink> {
        Arc::clone(&self.link)
    }

    /// The sender captured by the last `connect`.
    #[must_use]
    pub fn notifier(&self) -> Option<NotifySender> {
        self.notify.lock().unwrap().clone()
    }

    /// Drop the captured sender, as a device disconnect would.
    pub fn disconnect(&self) {
        self.notify.lock().unwrap().take();
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, notify: NotifySender) -> Result<Arc<dyn GattLink>, ConnectionError> {
        if !self.reachable {
            return Err(ConnectionError::DeviceNotFound {
                filter: "mock".into(),
                timeout: Duration::ZERO,
            });
        }
        *self.notify.lock().unwrap() = Some(notify);
        Ok(self.link.clone())
    }
}

/// [`RawMode`] that counts switches.
#[derive(Debug, Clone, Default)]
pub struct MockRawMode {
    enables: Arc<AtomicUsize>,
    restores: Arc<AtomicUsize>,
    fail: bool,
}

impl MockRawMode {
    /// A terminal that refuses raw mode.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Times raw mode was entered.
    #[must_use]
    pub fn enable_count(&self) -> usize {
        self.enables.load(Ordering::SeqCst)
    }

    /// Times the terminal was restored.
    #[must_use]
    pub fn restore_count(&self) -> usize {
        self.restores.load(Ordering::SeqCst)
    }

    /// Whether the terminal is currently raw.
    #[must_use]
    pub fn is_raw(&self) -> bool {
        self.enable_count() > self.restore_count()
    }
}

impl RawMode for MockRawMode {
    fn enable(&mut self) -> io::Result<()> {
        if self.fail {
            return Err(io::Error::other("not a terminal"));
        }
        self.enables.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn disable(&mut self) -> io::Result<()> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// [`InputSource`] replaying fixed bursts, then EOF.
#[derive(Debug, Default)]
pub struct ScriptedInput {
    bursts: VecDeque<Bytes>,
    endless: bool,
}

impl ScriptedInput {
    /// Replay `bursts` in order, then report EOF.
    pub fn new<'a>(bursts: impl IntoIterator<Item = &'a [u8]>) -> Self {
        Self {
            bursts: bursts.into_iter().map(Bytes::copy_from_slice).collect(),
            endless: false,
        }
    }

    /// Replay `bursts`, then wait forever instead of reporting EOF.
    pub fn then_pending<'a>(bursts: impl IntoIterator<Item = &'a [u8]>) -> Self {
        Self {
            endless: true,
            ..Self::new(bursts)
        }
    }

    /// Input that never arrives.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            bursts: VecDeque::new(),
            endless: true,
        }
    }
}

#[async_trait]
impl InputSource for ScriptedInput {
    async fn read_burst(&mut self) -> io::Result<Option<Bytes>> {
        tokio::task::yield_now().await;
        match self.bursts.pop_front() {
            Some(burst) => Ok(Some(burst)),
            None if self.endless => std::future::pending().await,
            None => Ok(None),
        }
    }
}

/// Sink whose writes always fail.
#[derive(Debug)]
pub struct FailingSink {
    kind: io::ErrorKind,
}

impl FailingSink {
    /// Fail with errors of `kind`.
    #[must_use]
    pub const fn new(kind: io::ErrorKind) -> Self {
        Self { kind }
    }
}

impl AsyncWrite for FailingSink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::from(self.kind)))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Sink shared with the test so output can be inspected mid-run.
#[derive(Debug, Clone, Default)]
pub struct SharedSink {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl SharedSink {
    /// Bytes written so far.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.buf.lock().unwrap().clone()
    }
}

impl AsyncWrite for SharedSink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.buf.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
