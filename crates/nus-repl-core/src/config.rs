//! Bridge tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, frame::PayloadSize, notify::DEFAULT_NOTIFY_QUEUE};

/// Ctrl-] ends the session by default, as in telnet.
pub const DEFAULT_EXIT_SEQUENCE: &[u8] = &[0x1d];

/// Configuration for one bridge session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Upper bound on the write payload. Can only lower what the link reports.
    pub payload_size: Option<usize>,
    /// Bytes that end the session when typed. Empty disables it.
    pub exit_sequence: Vec<u8>,
    /// Number of notifications buffered ahead of the terminal.
    pub notify_queue: usize,
    /// Largest single terminal read.
    pub read_buffer: usize,
    /// How long the surviving pump may take to wind down, in milliseconds.
    pub drain_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            payload_size: None,
            exit_sequence: DEFAULT_EXIT_SEQUENCE.to_vec(),
            notify_queue: DEFAULT_NOTIFY_QUEUE,
            read_buffer: 1024,
            drain_timeout_ms: 2000,
        }
    }
}

impl BridgeConfig {
    /// Check value ranges.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.payload_size == Some(0) {
            return Err(ConfigError::invalid("payload_size", "must be positive"));
        }
        if self.notify_queue == 0 {
            return Err(ConfigError::invalid("notify_queue", "must be positive"));
        }
        if self.read_buffer == 0 {
            return Err(ConfigError::invalid("read_buffer", "must be positive"));
        }
        Ok(())
    }

    /// Payload limit as a typed size.
    #[must_use]
    pub fn payload_limit(&self) -> Option<PayloadSize> {
        self.payload_size.and_then(PayloadSize::new)
    }

    /// Wind-down allowance for the second pump.
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}
