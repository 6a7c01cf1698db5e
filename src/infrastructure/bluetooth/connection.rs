//! BLE Connection Module
//!
//! btleplug-backed transport adapter for the bed's command characteristic.

use crate::domain::error::TransportError;
use crate::infrastructure::bluetooth::protocol::{self, BedCommand};
use crate::infrastructure::bluetooth::scanner;
use crate::infrastructure::bluetooth::transport::BedTransport;
use async_trait::async_trait;
use btleplug::api::{BDAddr, Characteristic, Peripheral as _, WriteType};
use btleplug::platform::{Adapter, Peripheral};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Hardware address of the bed
    pub address: BDAddr,
    /// How long to scan when the peripheral is not yet known to the adapter
    pub scan_window: Duration,
    /// Command characteristic UUID
    pub command_char_uuid: Uuid,
}

impl ConnectionConfig {
    pub fn new(address: BDAddr) -> Self {
        Self {
            address,
            scan_window: Duration::from_secs(5),
            command_char_uuid: protocol::COMMAND_CHAR_UUID,
        }
    }
}

/// Parse a "AA:BB:CC:DD:EE:FF" style address
pub fn parse_address(address: &str) -> anyhow::Result<BDAddr> {
    address
        .trim()
        .parse::<BDAddr>()
        .map_err(|e| anyhow::anyhow!("Invalid bed address {:?}: {}", address, e))
}

/// Transport adapter over a btleplug peripheral
pub struct BtleplugTransport {
    adapter: Adapter,
    config: ConnectionConfig,
    peripheral: Mutex<Option<Peripheral>>,
    command_char: Mutex<Option<Characteristic>>,
}

impl BtleplugTransport {
    pub fn new(adapter: Adapter, config: ConnectionConfig) -> Self {
        Self {
            adapter,
            config,
            peripheral: Mutex::new(None),
            command_char: Mutex::new(None),
        }
    }

    fn cached_peripheral(&self) -> Option<Peripheral> {
        self.peripheral
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn cached_char(&self) -> Option<Characteristic> {
        self.command_char
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn store_char(&self, characteristic: Option<Characteristic>) {
        *self.command_char.lock().unwrap_or_else(|e| e.into_inner()) = characteristic;
    }

    /// Resolve the peripheral handle, scanning once if the adapter has not seen it
    async fn resolve(&self) -> Result<Peripheral, TransportError> {
        if let Some(peripheral) = self.cached_peripheral() {
            return Ok(peripheral);
        }

        let peripheral =
            scanner::find_peripheral(&self.adapter, self.config.address, self.config.scan_window)
                .await?
                .ok_or_else(|| TransportError::Unavailable(self.config.address.to_string()))?;

        info!("Resolved bed peripheral {}", self.config.address);
        *self.peripheral.lock().unwrap_or_else(|e| e.into_inner()) = Some(peripheral.clone());
        Ok(peripheral)
    }

    fn find_command_char(&self, peripheral: &Peripheral) -> Option<Characteristic> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == self.config.command_char_uuid)
    }

    async fn command_characteristic(
        &self,
        peripheral: &Peripheral,
    ) -> Result<Characteristic, TransportError> {
        if let Some(c) = self.cached_char() {
            return Ok(c);
        }
        if let Some(c) = self.find_command_char(peripheral) {
            self.store_char(Some(c.clone()));
            return Ok(c);
        }

        // Discovery was skipped or failed during connect; try once more here.
        debug!("Command characteristic unknown, discovering services before write");
        peripheral.discover_services().await?;
        let c = self
            .find_command_char(peripheral)
            .ok_or(TransportError::CharacteristicNotFound(
                self.config.command_char_uuid,
            ))?;
        self.store_char(Some(c.clone()));
        Ok(c)
    }
}

#[async_trait]
impl BedTransport for BtleplugTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let peripheral = self.resolve().await?;
        if peripheral.is_connected().await? {
            debug!("Peripheral already connected");
            return Ok(());
        }

        info!("Connecting to bed {}", self.config.address);
        peripheral.connect().await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.store_char(None);
        let Some(peripheral) = self.cached_peripheral() else {
            return Ok(());
        };
        if peripheral.is_connected().await.unwrap_or(false) {
            peripheral.disconnect().await?;
            info!("Disconnected from bed {}", self.config.address);
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        match self.cached_peripheral() {
            Some(peripheral) => peripheral.is_connected().await.unwrap_or(false),
            None => false,
        }
    }

    async fn discover_services(&self) -> Result<(), TransportError> {
        let peripheral = self.cached_peripheral().ok_or(TransportError::NotConnected)?;
        peripheral.discover_services().await?;

        for service in peripheral.services() {
            debug!(
                "Service {} ({} characteristics)",
                service.uuid,
                service.characteristics.len()
            );
        }

        match self.find_command_char(&peripheral) {
            Some(c) => {
                info!("Found command characteristic {}", c.uuid);
                self.store_char(Some(c));
                Ok(())
            }
            None => {
                warn!("Command characteristic missing after discovery");
                Err(TransportError::CharacteristicNotFound(
                    self.config.command_char_uuid,
                ))
            }
        }
    }

    async fn write(&self, payload: &[u8]) -> Result<(), TransportError> {
        let peripheral = self.cached_peripheral().ok_or(TransportError::NotConnected)?;
        if !peripheral.is_connected().await.unwrap_or(false) {
            return Err(TransportError::NotConnected);
        }

        let characteristic = self.command_characteristic(&peripheral).await?;
        trace!(
            "Writing {:02X?} ({:?})",
            payload,
            BedCommand::from_bytes(payload)
        );
        peripheral
            .write(&characteristic, payload, WriteType::WithResponse)
            .await?;
        Ok(())
    }
}
