//! Pybricks hub control over its command/event characteristic.
//!
//! Pybricks firmware only exposes its REPL once asked to start it, and
//! reports through status events whether a user program (the REPL counts
//! as one) is still running.

use btleplug::{
    api::{Characteristic, Peripheral as _, WriteType},
    platform::Peripheral,
};
use uuid::Uuid;

/// Pybricks GATT service.
pub const PYBRICKS_SERVICE_UUID: Uuid = Uuid::from_u128(0xc5f5_0001_8280_46da_89f4_6d80_51e4_aeef);
/// Commands are written here; events arrive as notifications.
pub const PYBRICKS_COMMAND_EVENT_UUID: Uuid =
    Uuid::from_u128(0xc5f5_0002_8280_46da_89f4_6d80_51e4_aeef);
/// Hub capabilities (protocol v1.2.0 and later).
pub const PYBRICKS_HUB_CAPABILITIES_UUID: Uuid =
    Uuid::from_u128(0xc5f5_0003_8280_46da_89f4_6d80_51e4_aeef);

/// Interrupt sent on the UART before stopping the hub program.
pub const CTRL_C: u8 = 0x03;

/// Hub commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    StopUserProgram = 0,
    StartUserProgram = 1,
    StartRepl = 2,
}

impl Command {
    /// Wire encoding.
    #[must_use]
    pub const fn encode(self) -> [u8; 1] {
        [self as u8]
    }
}

/// Decoded status report event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    flags: u32,
}

impl StatusReport {
    const EVENT: u8 = 0x00;
    const PROGRAM_RUNNING_BIT: u32 = 6;

    /// Parse a command/event notification. `None` for other events.
    #[must_use]
    pub fn parse(event: &[u8]) -> Option<Self> {
        let (&kind, rest) = event.split_first()?;
        if kind != Self::EVENT {
            return None;
        }
        let flags: [u8; 4] = rest.get(..4)?.try_into().ok()?;
        Some(Self {
            flags: u32::from_le_bytes(flags),
        })
    }

    /// Raw status flags.
    #[must_use]
    pub const fn flags(&self) -> u32 {
        self.flags
    }

    /// Whether a user program (or the REPL) is running.
    #[must_use]
    pub const fn program_running(&self) -> bool {
        (self.flags >> Self::PROGRAM_RUNNING_BIT) & 1 == 1
    }
}

/// Decoded hub capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Largest write the hub accepts on any characteristic.
    pub max_write_size: u16,
}

impl Capabilities {
    /// Parse the capabilities characteristic value.
    #[must_use]
    pub fn parse(value: &[u8]) -> Option<Self> {
        let size: [u8; 2] = value.get(..2)?.try_into().ok()?;
        Some(Self {
            max_write_size: u16::from_le_bytes(size),
        })
    }
}

/// Read the capabilities characteristic, if the hub has one.
pub async fn read_capabilities(
    peripheral: &Peripheral,
    characteristic: &Characteristic,
) -> Option<Capabilities> {
    match peripheral.read(characteristic).await {
        Ok(value) => Capabilities::parse(&value),
        Err(e) => {
            tracing::debug!("Failed to read hub capabilities: {e}");
            None
        }
    }
}

/// The hub's command/event characteristic.
#[derive(Debug, Clone)]
pub struct HubControl {
    command: Characteristic,
}

impl HubControl {
    /// Wrap the resolved command/event characteristic.
    #[must_use]
    pub const fn new(command: Characteristic) -> Self {
        Self { command }
    }

    /// The command/event characteristic.
    #[must_use]
    pub const fn characteristic(&self) -> &Characteristic {
        &self.command
    }

    /// Send a command and wait for the hub to accept it.
    ///
    /// # Errors
    /// Returns the stack error if the write fails.
    pub async fn send(&self, peripheral: &Peripheral, command: Command) -> btleplug::Result<()> {
        tracing::debug!(?command, "Sending hub command");
        peripheral
            .write(&self.command, &command.encode(), WriteType::WithResponse)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_program_report() {
        let report = StatusReport::parse(&[0x00, 0x40, 0x00, 0x00, 0x00]).unwrap();
        assert!(report.program_running());
        assert_eq!(report.flags(), 0x40);
    }

    #[test]
    fn test_stopped_program_report() {
        let report = StatusReport::parse(&[0x00, 0x3f, 0x01, 0x00, 0x00, 0xff]).unwrap();
        assert!(!report.program_running());
        assert_eq!(report.flags(), 0x013f);
    }

    #[test]
    fn test_other_events_ignored() {
        assert_eq!(StatusReport::parse(&[0x01, b'h', b'i']), None);
        assert_eq!(StatusReport::parse(&[0x00, 0x40]), None);
        assert_eq!(StatusReport::parse(&[]), None);
    }

    #[test]
    fn test_capabilities() {
        let caps = Capabilities::parse(&[0x9e, 0x00, 0x01, 0, 0, 0, 0, 0x40, 0, 0]).unwrap();
        assert_eq!(caps.max_write_size, 158);
        assert_eq!(Capabilities::parse(&[0x9e]), None);
    }

    #[test]
    fn test_command_encoding() {
        assert_eq!(Command::StartRepl.encode(), [2]);
        assert_eq!(Command::StopUserProgram.encode(), [0]);
        assert_eq!(
            PYBRICKS_COMMAND_EVENT_UUID.to_string(),
            "c5f50002-8280-46da-89f4-6d8051e4aeef"
        );
    }
}
