use std::io;

use crossterm::{terminal, tty::IsTty};
use nus_repl_core::RawMode;

/// Raw mode on the process's controlling terminal.
///
/// Left alone when standard input is not a terminal, so piped input
/// behaves like any other byte stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrosstermRawMode {
    enabled: bool,
}

impl RawMode for CrosstermRawMode {
    fn enable(&mut self) -> io::Result<()> {
        if !io::stdin().is_tty() {
            tracing::debug!("stdin is not a terminal, skipping raw mode");
            return Ok(());
        }
        terminal::enable_raw_mode()?;
        self.enabled = true;
        Ok(())
    }

    fn disable(&mut self) -> io::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        terminal::disable_raw_mode()?;
        self.enabled = false;
        Ok(())
    }
}
