//! Scan, connect, and subscribe to a NUS device.

use std::sync::Arc;

use async_trait::async_trait;
use btleplug::{
    api::{Central, CentralEvent, Characteristic, Manager as _, Peripheral as _},
    platform::{Manager, Peripheral},
};
use futures::{StreamExt, future};
use nus_repl_core::{
    ConnectionError, Connector, GattLink, LinkInfo, NUS_RX_CHAR_UUID, NUS_TX_CHAR_UUID,
    NotifySender,
};
use uuid::Uuid;

use crate::{
    config::ScanConfig,
    forward::Forwarder,
    link::NusLink,
    pybricks::{
        Command, HubControl, PYBRICKS_COMMAND_EVENT_UUID, PYBRICKS_HUB_CAPABILITIES_UUID,
        read_capabilities,
    },
    scan::{DeviceFilter, backend, find_device},
};

/// [`Connector`] backed by the platform BLE stack.
#[derive(Debug, Clone)]
pub struct NusConnector {
    config: ScanConfig,
}

impl NusConnector {
    /// Create a connector.
    #[must_use]
    pub const fn new(config: ScanConfig) -> Self {
        Self { config }
    }

    /// Scan settings in use.
    #[must_use]
    pub const fn config(&self) -> &ScanConfig {
        &self.config
    }
}

fn find_char(peripheral: &Peripheral, uuid: Uuid) -> Result<Characteristic, ConnectionError> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid)
        .ok_or(ConnectionError::MissingCharacteristic(uuid))
}

/// Everything resolved between connecting and handing the link out.
struct Setup {
    rx_char: Characteristic,
    tx_char: Characteristic,
    hub: Option<HubControl>,
    max_payload: Option<usize>,
}

impl NusConnector {
    async fn setup(&self, peripheral: &Peripheral) -> Result<Setup, ConnectionError> {
        peripheral.connect().await.map_err(backend)?;
        peripheral.discover_services().await.map_err(backend)?;

        let rx_char = find_char(peripheral, NUS_RX_CHAR_UUID)?;
        let tx_char = find_char(peripheral, NUS_TX_CHAR_UUID)?;
        peripheral
            .subscribe(&tx_char)
            .await
            .map_err(|e| ConnectionError::Subscribe(e.to_string()))?;

        let mut max_payload = self.config.max_payload();
        let hub = if self.config.pybricks {
            let hub = HubControl::new(find_char(peripheral, PYBRICKS_COMMAND_EVENT_UUID)?);
            peripheral
                .subscribe(hub.characteristic())
                .await
                .map_err(|e| ConnectionError::Subscribe(e.to_string()))?;

            if let Ok(caps_char) = find_char(peripheral, PYBRICKS_HUB_CAPABILITIES_UUID) {
                if let Some(caps) = read_capabilities(peripheral, &caps_char).await {
                    let hub_max = usize::from(caps.max_write_size);
                    max_payload = Some(max_payload.map_or(hub_max, |m| m.min(hub_max)));
                }
            }

            hub.send(peripheral, Command::StartRepl)
                .await
                .map_err(backend)?;
            Some(hub)
        } else {
            None
        };

        Ok(Setup {
            rx_char,
            tx_char,
            hub,
            max_payload,
        })
    }
}

#[async_trait]
impl Connector for NusConnector {
    async fn connect(&self, notify: NotifySender) -> Result<Arc<dyn GattLink>, ConnectionError> {
        let manager = Manager::new().await.map_err(backend)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(backend)?
            .into_iter()
            .next()
            .ok_or(ConnectionError::NoAdapter)?;

        let filter = DeviceFilter::new(self.config.name.clone(), self.config.service());
        tracing::info!(%filter, "Searching for device");
        let (peripheral, label) =
            find_device(&adapter, &filter, self.config.scan_timeout()).await?;

        // Subscribe before connecting so an early disconnect is not missed.
        let events = adapter.events().await.map_err(backend)?;

        let setup = match self.setup(&peripheral).await {
            Ok(setup) => setup,
            Err(e) => {
                if let Err(err) = peripheral.disconnect().await {
                    tracing::debug!("Failed to disconnect after setup error: {err}");
                }
                return Err(e);
            }
        };
        let notifications = match peripheral.notifications().await {
            Ok(stream) => stream,
            Err(e) => {
                if let Err(err) = peripheral.disconnect().await {
                    tracing::debug!("Failed to disconnect after setup error: {err}");
                }
                return Err(ConnectionError::Subscribe(e.to_string()));
            }
        };

        let write_type = self.config.write_mode.resolve(setup.rx_char.properties);
        tracing::debug!(?write_type, max_payload = ?setup.max_payload, "Link ready");

        let forwarder = Forwarder::new(setup.tx_char.uuid, setup.hub.is_some(), peripheral.id());
        let notifications = notifications.map(|n| (n.uuid, n.value));
        let disconnects = events.filter_map(|event| {
            future::ready(match event {
                CentralEvent::DeviceDisconnected(id) => Some(id),
                _ => None,
            })
        });
        let link = Arc::new(NusLink::new(
            peripheral,
            setup.rx_char,
            setup.tx_char,
            write_type,
            setup.hub,
            LinkInfo::nus(label, setup.max_payload),
        ));

        // The sender moves into the task; it is dropped when forwarding ends.
        let forwarder = tokio::spawn(async move {
            let end = forwarder.run(notifications, disconnects, notify).await;
            tracing::debug!(?end, "Notification forwarding ended");
        });
        link.attach_forwarder(forwarder);

        Ok(link)
    }
}
