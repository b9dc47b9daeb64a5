//! Terminal input source and output sink.
//!
//! Input is forwarded as the bytes the terminal produced. Nothing is
//! decoded, so escape sequences, modifier encodings and non-UTF-8 bytes
//! reach the device unchanged.

use nus_repl_core::{BridgeConfig, ReaderSource};
use tokio::io::{AsyncRead, Stdin};

/// Raw bytes from any reader, at most `read_buffer` per burst.
#[must_use]
pub fn raw_source<R: AsyncRead>(reader: R, config: &BridgeConfig) -> ReaderSource<R> {
    ReaderSource::new(reader, config.read_buffer)
}

/// Raw bytes from standard input.
///
/// With the terminal in raw mode each keystroke arrives as soon as it is
/// typed. Piped input works too, and its end of file ends the session.
#[must_use]
pub fn stdin_source(config: &BridgeConfig) -> ReaderSource<Stdin> {
    raw_source(tokio::io::stdin(), config)
}

/// Sink for device output.
#[must_use]
pub fn stdout_sink() -> tokio::io::Stdout {
    tokio::io::stdout()
}
