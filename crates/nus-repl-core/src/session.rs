//! Session setup, pump wiring, and teardown.

use std::sync::Arc;

use tokio::{io::AsyncWrite, sync::watch};

use crate::{
    config::BridgeConfig,
    error::{ConnectionError, SessionError},
    frame::PayloadSize,
    input::{InputExit, InputPump, InputSource},
    link::{Connection, Connector, LinkInfo},
    notify::{NotifyChannel, notify_queue},
    output::{OutputExit, OutputPump},
    terminal::{RawMode, RawModeGuard},
    write::WriteChannel,
};

/// Resolves once `rx` reads `true`. Never resolves if the sender is gone.
pub(crate) async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

pub(crate) fn is_cancelled(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow()
}

/// Why a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The user typed the exit sequence.
    ExitKey,
    /// Terminal input reached end of file.
    InputClosed,
    /// The device or the link ended the session.
    RemoteClosed,
    /// Shutdown was requested from outside, e.g. by a signal.
    Shutdown,
}

/// Final outcome of a session.
#[derive(Debug)]
pub enum SessionStatus {
    /// Ended normally.
    Graceful(ExitReason),
    /// Ended by a transport, sink, or terminal failure.
    Failed(SessionError),
}

impl SessionStatus {
    /// Whether the session ended normally.
    #[must_use]
    pub const fn is_graceful(&self) -> bool {
        matches!(self, Self::Graceful(_))
    }

    /// Process exit code: 0 for graceful, 1 for failure.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Graceful(_) => 0,
            Self::Failed(_) => 1,
        }
    }
}

/// Requests shutdown of a running session from outside.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Ask both pumps to stop.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Establishes connections and turns them into sessions.
pub struct SessionController<C> {
    connector: C,
    config: BridgeConfig,
}

impl<C: Connector> SessionController<C> {
    /// Create a controller.
    #[must_use]
    pub const fn new(connector: C, config: BridgeConfig) -> Self {
        Self { connector, config }
    }

    /// Bridge configuration in use.
    #[must_use]
    pub const fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Connect to the device.
    ///
    /// # Errors
    /// Returns the [`ConnectionError`] reported by the connector.
    pub async fn connect(&self) -> Result<Session, ConnectionError> {
        let (notify_tx, notify_rx) = notify_queue(self.config.notify_queue);
        let link = self.connector.connect(notify_tx).await?;
        let connection = Arc::new(Connection::new(link, self.config.payload_limit()));

        tracing::info!(
            peer = %connection.info().peer,
            payload = %connection.payload_size(),
            "Connected"
        );

        let notify = NotifyChannel::new(notify_rx, Arc::clone(&connection));
        let (shutdown, _) = watch::channel(false);
        Ok(Session {
            connection,
            notify,
            shutdown: Arc::new(shutdown),
            config: self.config.clone(),
        })
    }
}

enum Stopped {
    Input(Result<InputExit, SessionError>),
    Output(Result<OutputExit, SessionError>),
}

impl Stopped {
    fn into_status(self) -> SessionStatus {
        match self {
            Self::Input(Ok(InputExit::ExitKey)) => SessionStatus::Graceful(ExitReason::ExitKey),
            Self::Input(Ok(InputExit::Eof)) => SessionStatus::Graceful(ExitReason::InputClosed),
            Self::Output(Ok(OutputExit::RemoteClosed)) => {
                SessionStatus::Graceful(ExitReason::RemoteClosed)
            }
            Self::Input(Ok(InputExit::Cancelled)) | Self::Output(Ok(OutputExit::Cancelled)) => {
                SessionStatus::Graceful(ExitReason::Shutdown)
            }
            Self::Input(Err(e)) | Self::Output(Err(e)) => SessionStatus::Failed(e),
        }
    }
}

/// A live connection ready to be bridged to a terminal.
pub struct Session {
    connection: Arc<Connection>,
    notify: NotifyChannel,
    shutdown: Arc<watch::Sender<bool>>,
    config: BridgeConfig,
}

impl Session {
    /// Link characteristics.
    #[must_use]
    pub fn info(&self) -> &LinkInfo {
        self.connection.info()
    }

    /// Negotiated write payload.
    #[must_use]
    pub fn payload_size(&self) -> PayloadSize {
        self.connection.payload_size()
    }

    /// Handle for stopping the session from another task.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown),
        }
    }

    /// Bridge the terminal to the device until either side stops.
    ///
    /// Raw mode is held for the whole run and restored on every exit path.
    /// The connection is closed exactly once before returning.
    pub async fn run<I, W, M>(self, input: I, sink: W, raw_mode: M) -> SessionStatus
    where
        I: InputSource,
        W: AsyncWrite + Unpin + Send,
        M: RawMode,
    {
        let Self {
            connection,
            notify,
            shutdown,
            config,
        } = self;

        let mut guard = match RawModeGuard::acquire(raw_mode) {
            Ok(guard) => guard,
            Err(e) => {
                connection.close().await;
                return SessionStatus::Failed(SessionError::Terminal(e));
            }
        };

        let writer = WriteChannel::new(Arc::clone(&connection));
        let mut input = InputPump::new(
            input,
            writer,
            config.exit_sequence.clone(),
            shutdown.subscribe(),
        );
        let mut output = OutputPump::new(sink, notify, shutdown.subscribe());

        let first = {
            let input_run = input.run();
            let output_run = output.run();
            tokio::pin!(input_run, output_run);

            let first = tokio::select! {
                r = &mut input_run => Stopped::Input(r),
                r = &mut output_run => Stopped::Output(r),
            };
            shutdown.send_replace(true);

            let second = match first {
                Stopped::Input(_) => tokio::time::timeout(config.drain_timeout(), &mut output_run)
                    .await
                    .map(Stopped::Output),
                Stopped::Output(_) => tokio::time::timeout(config.drain_timeout(), &mut input_run)
                    .await
                    .map(Stopped::Input),
            };
            match second {
                Ok(Stopped::Input(Err(e)) | Stopped::Output(Err(e))) => {
                    tracing::debug!("Second pump failed during shutdown: {e}");
                }
                Ok(_) => {}
                Err(_) => tracing::warn!("Pump did not stop within {:?}", config.drain_timeout()),
            }
            first
        };

        connection.close().await;

        let mut status = first.into_status();
        if let Err(e) = guard.release() {
            tracing::warn!("Failed to restore terminal: {e}");
            if status.is_graceful() {
                status = SessionStatus::Failed(SessionError::Terminal(e));
            }
        }

        match &status {
            SessionStatus::Graceful(ExitReason::RemoteClosed) => {
                tracing::info!(peer = %connection.info().peer, "Device disconnected");
            }
            SessionStatus::Graceful(reason) => tracing::info!(?reason, "Session ended"),
            SessionStatus::Failed(e) => tracing::error!("Session failed: {e}"),
        }
        status
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}
