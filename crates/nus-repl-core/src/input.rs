//! Terminal input to BLE writes.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::watch,
};

use crate::{
    error::SessionError,
    frame::FrameChunker,
    session::{cancelled, is_cancelled},
    write::WriteChannel,
};

/// A source of raw terminal bytes.
#[async_trait]
pub trait InputSource: Send {
    /// Wait for the next burst of input, in whatever size it arrives.
    ///
    /// Returns `Ok(None)` at end of input. Must be cancel-safe: dropping
    /// the future before it resolves loses no bytes.
    async fn read_burst(&mut self) -> io::Result<Option<Bytes>>;
}

#[async_trait]
impl<S: InputSource + ?Sized> InputSource for Box<S> {
    async fn read_burst(&mut self) -> io::Result<Option<Bytes>> {
        (**self).read_burst().await
    }
}

/// Adapts any async reader into an [`InputSource`].
#[derive(Debug)]
pub struct ReaderSource<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R> ReaderSource<R> {
    /// Read at most `capacity` bytes per burst.
    #[must_use]
    pub fn new(reader: R, capacity: usize) -> Self {
        Self {
            reader,
            buf: vec![0; capacity.max(1)],
        }
    }

    /// Unwrap the reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[async_trait]
impl<R> InputSource for ReaderSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn read_burst(&mut self) -> io::Result<Option<Bytes>> {
        loop {
            match self.reader.read(&mut self.buf).await {
                Ok(0) => return Ok(None),
                Ok(n) => return Ok(Some(Bytes::copy_from_slice(&self.buf[..n]))),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }
}

/// Lifecycle of the input pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputState {
    /// Forwarding input as it arrives.
    Running,
    /// Sending the last bytes before stopping.
    Draining,
    /// Done; no further reads or writes.
    Stopped,
}

/// Why the input pump stopped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputExit {
    /// The exit sequence was typed.
    ExitKey,
    /// Terminal input reached end of file.
    Eof,
    /// The session asked the pump to stop.
    Cancelled,
}

/// Finds the exit sequence in the input stream.
///
/// Only bytes that could still turn out to be the start of the sequence
/// are withheld; everything else is released at once.
#[derive(Debug, Clone, Default)]
struct ExitMatcher {
    sequence: Vec<u8>,
    pending: Vec<u8>,
}

impl ExitMatcher {
    const fn new(sequence: Vec<u8>) -> Self {
        Self {
            sequence,
            pending: Vec::new(),
        }
    }

    /// Returns the bytes to forward and whether the sequence completed.
    /// Input after a completed sequence is discarded.
    fn scan(&mut self, burst: &[u8]) -> (Vec<u8>, bool) {
        if self.sequence.is_empty() {
            return (burst.to_vec(), false);
        }

        let mut out = Vec::with_capacity(burst.len());
        for &byte in burst {
            self.pending.push(byte);
            while !self.sequence.starts_with(&self.pending) {
                out.push(self.pending.remove(0));
            }
            if self.pending.len() == self.sequence.len() {
                self.pending.clear();
                return (out, true);
            }
        }
        (out, false)
    }

    fn take_pending(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending)
    }
}

/// Drains terminal input into the write channel.
pub struct InputPump<S> {
    source: S,
    writer: WriteChannel,
    chunker: FrameChunker,
    exit: ExitMatcher,
    state: InputState,
    shutdown: watch::Receiver<bool>,
}

impl<S: InputSource> InputPump<S> {
    /// Create a pump; `exit_sequence` may be empty to disable it.
    #[must_use]
    pub fn new(
        source: S,
        writer: WriteChannel,
        exit_sequence: Vec<u8>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let chunker = FrameChunker::new(writer.connection().payload_size());
        Self {
            source,
            writer,
            chunker,
            exit: ExitMatcher::new(exit_sequence),
            state: InputState::Running,
            shutdown,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> InputState {
        self.state
    }

    /// Run until the exit sequence, end of input, cancellation, or failure.
    ///
    /// # Errors
    /// Returns [`SessionError::Transport`] when a write fails and
    /// [`SessionError::Input`] when the terminal read fails.
    pub async fn run(&mut self) -> Result<InputExit, SessionError> {
        let result = self.pump().await;
        self.state = InputState::Stopped;
        match &result {
            Ok(exit) => tracing::debug!(?exit, "Input pump stopped"),
            Err(e) => tracing::debug!("Input pump failed: {e}"),
        }
        result
    }

    async fn pump(&mut self) -> Result<InputExit, SessionError> {
        loop {
            if is_cancelled(&self.shutdown) {
                return Ok(InputExit::Cancelled);
            }

            let burst = tokio::select! {
                biased;
                () = cancelled(&mut self.shutdown) => return Ok(InputExit::Cancelled),
                burst = self.source.read_burst() => burst.map_err(SessionError::Input)?,
            };

            let Some(burst) = burst else {
                self.state = InputState::Draining;
                let rest = self.exit.take_pending();
                self.drain(&rest).await?;
                return Ok(InputExit::Eof);
            };

            let (forward, exit) = self.exit.scan(&burst);
            if exit {
                self.state = InputState::Draining;
                self.drain(&forward).await?;
                return Ok(InputExit::ExitKey);
            }
            if !self.forward(&forward).await? {
                return Ok(InputExit::Cancelled);
            }
        }
    }

    /// Send a burst, checking for cancellation between chunks.
    /// Returns `false` if cancelled part way.
    async fn forward(&self, bytes: &[u8]) -> Result<bool, SessionError> {
        for chunk in self.chunker.chunks(bytes) {
            if is_cancelled(&self.shutdown) {
                return Ok(false);
            }
            self.writer.send(chunk).await?;
        }
        Ok(true)
    }

    /// Send the final bytes regardless of cancellation.
    async fn drain(&self, bytes: &[u8]) -> Result<(), SessionError> {
        for chunk in self.chunker.chunks(bytes) {
            self.writer.send(chunk).await?;
        }
        Ok(())
    }
}
