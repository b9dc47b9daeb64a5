//! Scoped ownership of the terminal's raw mode.

use std::io;

/// Switches the local terminal in and out of raw mode.
pub trait RawMode: Send {
    /// Disable line editing and echo.
    ///
    /// # Errors
    /// Returns the OS error if the terminal cannot be switched.
    fn enable(&mut self) -> io::Result<()>;

    /// Restore the mode saved by `enable`.
    ///
    /// # Errors
    /// Returns the OS error if the terminal cannot be restored.
    fn disable(&mut self) -> io::Result<()>;
}

/// Holds the terminal in raw mode until released or dropped.
///
/// The terminal is restored exactly once, on whichever of `release` or
/// `Drop` comes first.
pub struct RawModeGuard<M: RawMode> {
    mode: M,
    held: bool,
}

impl<M: RawMode> RawModeGuard<M> {
    /// Enter raw mode.
    ///
    /// # Errors
    /// Returns the error from [`RawMode::enable`]; nothing is held then.
    pub fn acquire(mut mode: M) -> io::Result<Self> {
        mode.enable()?;
        Ok(Self { mode, held: true })
    }

    /// Whether the terminal is still in raw mode.
    #[must_use]
    pub const fn is_held(&self) -> bool {
        self.held
    }

    /// Restore the terminal now. Later calls do nothing.
    ///
    /// # Errors
    /// Returns the error from [`RawMode::disable`].
    pub fn release(&mut self) -> io::Result<()> {
        if !self.held {
            return Ok(());
        }
        self.held = false;
        self.mode.disable()
    }
}

impl<M: RawMode> Drop for RawModeGuard<M> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!("Failed to restore terminal mode: {e}");
        }
    }
}
