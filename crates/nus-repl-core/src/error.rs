//! Error taxonomy for the bridge.

use std::{io, time::Duration};

use thiserror::Error;
use uuid::Uuid;

/// Failure to establish a link. Fatal, raised before a session exists.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("No Bluetooth adapter available")]
    NoAdapter,
    #[error("No device matching {filter} found within {timeout:?}")]
    DeviceNotFound { filter: String, timeout: Duration },
    #[error("Characteristic not found: {0}")]
    MissingCharacteristic(Uuid),
    #[error("Notification subscription failed: {0}")]
    Subscribe(String),
    #[error("Bluetooth error: {0}")]
    Backend(String),
}

/// Failure of an established link. Fatal to the current session.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection is no longer live")]
    NotConnected,
    #[error("Chunk of {len} bytes exceeds payload limit of {max}")]
    Oversized { len: usize, max: usize },
    #[error("Write failed: {0}")]
    Write(String),
    #[error("Close failed: {0}")]
    Close(String),
}

/// The link ended. A normal termination signal, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Connection closed")]
pub struct ConnectionClosed;

/// Writing to the local output sink failed.
#[derive(Debug, Error)]
#[error("Output write failed: {0}")]
pub struct SinkError(#[from] pub io::Error);

/// Fatal condition that ended a running session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("Terminal input failed: {0}")]
    Input(#[source] io::Error),
    #[error("Terminal mode switch failed: {0}")]
    Terminal(#[source] io::Error),
}

/// Invalid bridge configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for '{field}': {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    /// Creates an invalid-field error.
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}
