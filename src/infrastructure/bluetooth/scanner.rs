//! BLE Scanner Module
//!
//! Address resolution for the bed and the platform connectivity watcher that
//! turns btleplug central events into [`LinkEvent`]s for the session.

use crate::domain::error::TransportError;
use crate::domain::models::LinkEvent;
use btleplug::api::{BDAddr, Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// First Bluetooth adapter on the host
pub async fn default_adapter() -> anyhow::Result<Adapter> {
    let manager = Manager::new().await?;
    manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("No Bluetooth adapters found"))
}

async fn known_peripheral(
    adapter: &Adapter,
    address: BDAddr,
) -> Result<Option<Peripheral>, TransportError> {
    Ok(adapter
        .peripherals()
        .await?
        .into_iter()
        .find(|p| p.address() == address))
}

/// Look the bed up among known peripherals, scanning for `scan_window` if needed
pub async fn find_peripheral(
    adapter: &Adapter,
    address: BDAddr,
    scan_window: Duration,
) -> Result<Option<Peripheral>, TransportError> {
    if let Some(p) = known_peripheral(adapter, address).await? {
        return Ok(Some(p));
    }

    info!("Scanning {:?} for bed {}", scan_window, address);
    adapter.start_scan(ScanFilter::default()).await?;

    let poll = Duration::from_millis(250);
    let deadline = tokio::time::Instant::now() + scan_window;
    let found = loop {
        if let Some(p) = known_peripheral(adapter, address).await? {
            break Some(p);
        }
        if tokio::time::Instant::now() >= deadline {
            break None;
        }
        tokio::time::sleep(poll).await;
    };

    if let Err(e) = adapter.stop_scan().await {
        warn!("Failed to stop scan: {}", e);
    }
    if found.is_none() {
        warn!("Bed {} not seen during scan", address);
    }
    Ok(found)
}

fn classify(event: &CentralEvent) -> Option<(&PeripheralId, LinkEvent)> {
    match event {
        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
            Some((id, LinkEvent::Advertised))
        }
        CentralEvent::DeviceConnected(id) => Some((id, LinkEvent::Connected)),
        CentralEvent::DeviceDisconnected(id) => Some((id, LinkEvent::Disconnected)),
        _ => None,
    }
}

/// Forwards link-layer changes for one address to the session
pub struct ConnectivityWatcher {
    handle: JoinHandle<()>,
}

impl ConnectivityWatcher {
    /// Subscribe to the adapter's events and forward the ones for `address`
    pub async fn spawn(
        adapter: Adapter,
        address: BDAddr,
        event_sender: mpsc::UnboundedSender<LinkEvent>,
    ) -> anyhow::Result<Self> {
        let mut events = adapter.events().await?;

        let handle = tokio::spawn(async move {
            let mut bed_id: Option<PeripheralId> = None;

            while let Some(event) = events.next().await {
                let Some((id, link_event)) = classify(&event) else {
                    continue;
                };

                let matches = match &bed_id {
                    Some(known) => known == id,
                    None => match adapter.peripheral(id).await {
                        Ok(p) if p.address() == address => {
                            bed_id = Some(id.clone());
                            true
                        }
                        _ => false,
                    },
                };
                if !matches {
                    continue;
                }

                debug!("Link event for {}: {:?}", address, link_event);
                if event_sender.send(link_event).is_err() {
                    info!("Session gone, stopping connectivity watcher");
                    break;
                }
            }
        });

        Ok(Self { handle })
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for ConnectivityWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
