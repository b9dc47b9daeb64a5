//! Terminal side of the bridge.
//!
//! Provides:
//! - `CrosstermRawMode` - Raw mode switching for the controlling terminal
//! - `stdin_source` - Standard input as unbuffered raw bytes
//! - `stdout_sink` - Where device output is written

pub mod input;
pub mod raw;

pub use input::{raw_source, stdin_source, stdout_sink};
pub use raw::CrosstermRawMode;
