//! btleplug-backed Nordic UART Service link.
//!
//! Provides:
//! - `NusConnector` - Scan, connect, and subscribe to a NUS device
//! - `NusLink` - GATT writes and teardown for an established link
//! - `Forwarder` - Routes notifications into the session queue
//! - Pybricks hub control (start/stop the REPL program)

pub mod config;
pub mod connector;
pub mod forward;
pub mod link;
pub mod pybricks;
pub mod scan;

pub use config::{ScanConfig, WriteMode};
pub use connector::NusConnector;
pub use forward::{ForwardEnd, Forwarder};
pub use link::NusLink;
pub use scan::DeviceFilter;
