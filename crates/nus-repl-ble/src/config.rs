//! Device discovery and link settings.

use std::time::Duration;

use btleplug::api::{CharPropFlags, WriteType};
use nus_repl_core::{NUS_SERVICE_UUID, PayloadSize};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pybricks::PYBRICKS_SERVICE_UUID;

/// How writes to the RX characteristic are acknowledged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriteMode {
    /// With response when the characteristic supports it.
    #[default]
    Auto,
    /// Always wait for the device's write response.
    WithResponse,
    /// Never wait for a write response.
    WithoutResponse,
}

impl WriteMode {
    /// Pick the write type for a characteristic.
    #[must_use]
    pub fn resolve(self, properties: CharPropFlags) -> WriteType {
        match self {
            Self::WithResponse => WriteType::WithResponse,
            Self::WithoutResponse => WriteType::WithoutResponse,
            Self::Auto if properties.contains(CharPropFlags::WRITE) => WriteType::WithResponse,
            Self::Auto => WriteType::WithoutResponse,
        }
    }
}

/// Settings for finding and connecting to the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Local name or address of the device. Any device matches if unset.
    pub name: Option<String>,
    /// Advertised service to filter on. Defaults per mode.
    pub service: Option<Uuid>,
    /// How long to scan before giving up, in milliseconds.
    pub scan_timeout_ms: u64,
    /// Write acknowledgement policy.
    pub write_mode: WriteMode,
    /// Drive a Pybricks hub: start its REPL and stop it on exit.
    pub pybricks: bool,
    /// ATT MTU of the link, when known. The stack does not report it.
    pub mtu: Option<u16>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            name: None,
            service: None,
            scan_timeout_ms: 10_000,
            write_mode: WriteMode::Auto,
            pybricks: false,
            mtu: None,
        }
    }
}

impl ScanConfig {
    /// The advertised service to look for.
    #[must_use]
    pub fn service(&self) -> Uuid {
        self.service.unwrap_or(if self.pybricks {
            PYBRICKS_SERVICE_UUID
        } else {
            NUS_SERVICE_UUID
        })
    }

    /// Scan deadline.
    #[must_use]
    pub const fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    /// Write payload implied by the configured MTU.
    #[must_use]
    pub fn max_payload(&self) -> Option<usize> {
        self.mtu.map(|mtu| PayloadSize::from_att_mtu(mtu).get())
    }
}
