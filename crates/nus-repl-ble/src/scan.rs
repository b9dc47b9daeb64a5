//! Finding the target device.

use std::time::Duration;

use btleplug::{
    api::{Central, Peripheral as _, ScanFilter},
    platform::{Adapter, Peripheral},
};
use nus_repl_core::ConnectionError;
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Which advertisement counts as the target device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFilter {
    name: Option<String>,
    service: Uuid,
}

impl DeviceFilter {
    /// Match devices advertising `service`, optionally by name or address.
    #[must_use]
    pub const fn new(name: Option<String>, service: Uuid) -> Self {
        Self { name, service }
    }

    /// The advertised service required.
    #[must_use]
    pub const fn service(&self) -> Uuid {
        self.service
    }

    /// Whether an advertisement matches.
    ///
    /// The name matches the local name exactly, or the address ignoring case.
    #[must_use]
    pub fn matches(&self, local_name: Option<&str>, address: &str, services: &[Uuid]) -> bool {
        if !services.contains(&self.service) {
            return false;
        }
        match &self.name {
            None => true,
            Some(name) => local_name == Some(name.as_str()) || address.eq_ignore_ascii_case(name),
        }
    }
}

impl std::fmt::Display for DeviceFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "'{name}' advertising {}", self.service),
            None => write!(f, "any device advertising {}", self.service),
        }
    }
}

pub(crate) fn backend(e: btleplug::Error) -> ConnectionError {
    ConnectionError::Backend(e.to_string())
}

/// Scan until a matching device shows up or `timeout` elapses.
///
/// Returns the peripheral and a label for it.
pub async fn find_device(
    adapter: &Adapter,
    filter: &DeviceFilter,
    timeout: Duration,
) -> Result<(Peripheral, String), ConnectionError> {
    adapter
        .start_scan(ScanFilter {
            services: vec![filter.service()],
        })
        .await
        .map_err(backend)?;

    let found = tokio::time::timeout(timeout, poll_until_found(adapter, filter)).await;

    if let Err(e) = adapter.stop_scan().await {
        tracing::debug!("Failed to stop scan: {e}");
    }

    match found {
        Ok(result) => result,
        Err(_) => Err(ConnectionError::DeviceNotFound {
            filter: filter.to_string(),
            timeout,
        }),
    }
}

async fn poll_until_found(
    adapter: &Adapter,
    filter: &DeviceFilter,
) -> Result<(Peripheral, String), ConnectionError> {
    loop {
        for peripheral in adapter.peripherals().await.map_err(backend)? {
            let Ok(Some(props)) = peripheral.properties().await else {
                continue;
            };
            let address = props.address.to_string();
            if filter.matches(props.local_name.as_deref(), &address, &props.services) {
                let label = props.local_name.unwrap_or(address);
                tracing::debug!(device = %label, rssi = ?props.rssi, "Found device");
                return Ok((peripheral, label));
            }
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use nus_repl_core::NUS_SERVICE_UUID;

    use super::*;

    #[test]
    fn test_requires_advertised_service() {
        let filter = DeviceFilter::new(None, NUS_SERVICE_UUID);
        assert!(filter.matches(None, "AA:BB:CC:DD:EE:FF", &[NUS_SERVICE_UUID]));
        assert!(!filter.matches(Some("hub"), "AA:BB:CC:DD:EE:FF", &[]));
    }

    #[test]
    fn test_matches_name_or_address() {
        let filter = DeviceFilter::new(Some("Pybricks Hub".into()), NUS_SERVICE_UUID);
        let services = [NUS_SERVICE_UUID];
        assert!(filter.matches(Some("Pybricks Hub"), "AA:BB:CC:DD:EE:FF", &services));
        assert!(!filter.matches(Some("pybricks hub"), "AA:BB:CC:DD:EE:FF", &services));
        assert!(!filter.matches(None, "AA:BB:CC:DD:EE:FF", &services));

        let filter = DeviceFilter::new(Some("aa:bb:cc:dd:ee:ff".into()), NUS_SERVICE_UUID);
        assert!(filter.matches(Some("Other"), "AA:BB:CC:DD:EE:FF", &services));
    }

    #[test]
    fn test_display() {
        let filter = DeviceFilter::new(Some("esp32".into()), NUS_SERVICE_UUID);
        assert_eq!(
            filter.to_string(),
            "'esp32' advertising 6e400001-b5a3-f393-e0a9-e50e24dcca9e"
        );
    }
}
