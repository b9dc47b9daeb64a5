//! GATT writes and teardown for an established NUS link.

use std::sync::Mutex;

use async_trait::async_trait;
use btleplug::{
    api::{Characteristic, Peripheral as _, WriteType},
    platform::Peripheral,
};
use nus_repl_core::{GattLink, LinkInfo, TransportError};
use tokio::task::JoinHandle;

use crate::pybricks::{CTRL_C, Command, HubControl};

/// A connected NUS peripheral.
pub struct NusLink {
    peripheral: Peripheral,
    rx_char: Characteristic,
    tx_char: Characteristic,
    write_type: WriteType,
    hub: Option<HubControl>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
    info: LinkInfo,
}

impl NusLink {
    pub(crate) const fn new(
        peripheral: Peripheral,
        rx_char: Characteristic,
        tx_char: Characteristic,
        write_type: WriteType,
        hub: Option<HubControl>,
        info: LinkInfo,
    ) -> Self {
        Self {
            peripheral,
            rx_char,
            tx_char,
            write_type,
            hub,
            forwarder: Mutex::new(None),
            info,
        }
    }

    /// Hand over the task pushing notifications into the session.
    pub(crate) fn attach_forwarder(&self, handle: JoinHandle<()>) {
        if let Ok(mut slot) = self.forwarder.lock() {
            *slot = Some(handle);
        }
    }

    /// Write type used for the RX characteristic.
    #[must_use]
    pub const fn write_type(&self) -> WriteType {
        self.write_type
    }

    async fn stop_hub_program(&self, hub: &HubControl) {
        if let Err(e) = self
            .peripheral
            .write(&self.rx_char, &[CTRL_C], WriteType::WithoutResponse)
            .await
        {
            tracing::debug!("Failed to interrupt hub program: {e}");
        }
        if let Err(e) = hub.send(&self.peripheral, Command::StopUserProgram).await {
            tracing::debug!("Failed to stop hub program: {e}");
        }
        if let Err(e) = self.peripheral.unsubscribe(hub.characteristic()).await {
            tracing::debug!("Failed to unsubscribe hub events: {e}");
        }
    }
}

#[async_trait]
impl GattLink for NusLink {
    fn info(&self) -> &LinkInfo {
        &self.info
    }

    async fn write(&self, chunk: &[u8]) -> Result<(), TransportError> {
        self.peripheral
            .write(&self.rx_char, chunk, self.write_type)
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if let Some(hub) = &self.hub {
            self.stop_hub_program(hub).await;
        }
        if let Err(e) = self.peripheral.unsubscribe(&self.tx_char).await {
            tracing::debug!("Failed to unsubscribe: {e}");
        }

        let forwarder = self.forwarder.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = forwarder {
            handle.abort();
        }

        self.peripheral
            .disconnect()
            .await
            .map_err(|e| TransportError::Close(e.to_string()))?;
        tracing::debug!(peer = %self.info.peer, "Disconnected");
        Ok(())
    }
}

impl Drop for NusLink {
    fn drop(&mut self) {
        if let Some(handle) = self.forwarder.get_mut().ok().and_then(Option::take) {
            handle.abort();
        }
    }
}
