//! Byte-exact bridge between a local terminal and a BLE UART link.
//!
//! This crate provides the transport-agnostic core:
//! - `FrameChunker` - Split outbound bytes into payload-sized writes
//! - `WriteChannel` / `NotifyChannel` - Serialized writes and ordered notifications
//! - `InputPump` / `OutputPump` - The two directions of the pipe
//! - `SessionController` - Connection setup, pump wiring, and teardown
//! - `GattLink` / `Connector` - Seams implemented by the BLE collaborator

pub mod config;
pub mod error;
pub mod frame;
pub mod input;
pub mod link;
pub mod notify;
pub mod output;
pub mod session;
pub mod terminal;
pub mod write;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::BridgeConfig;
pub use error::{
    ConfigError, ConnectionClosed, ConnectionError, SessionError, SinkError, TransportError,
};
pub use frame::{FrameChunker, MIN_PAYLOAD, PayloadSize};
pub use input::{InputExit, InputPump, InputSource, InputState, ReaderSource};
pub use link::{
    Connection, Connector, GattLink, LinkInfo, NUS_RX_CHAR_UUID, NUS_SERVICE_UUID, NUS_TX_CHAR_UUID,
};
pub use notify::{NotifyChannel, NotifySender, notify_queue};
pub use output::{OutputExit, OutputPump};
pub use session::{ExitReason, Session, SessionController, SessionStatus, ShutdownHandle};
pub use terminal::{RawMode, RawModeGuard};
pub use write::WriteChannel;
