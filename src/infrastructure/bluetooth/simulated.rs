//! In-memory bed used for dry runs and tests.
//!
//! Records every decoded command and lets callers inject the faults a flaky
//! radio produces: unreachable peripheral, failing or hanging connects, failed
//! discovery, failing or hanging writes, and link drops.

use crate::domain::error::TransportError;
use crate::infrastructure::bluetooth::protocol::{BedCommand, COMMAND_CHAR_UUID};
use crate::infrastructure::bluetooth::transport::BedTransport;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::trace;

#[derive(Debug, Default)]
struct SimState {
    connected: bool,
    unavailable: bool,
    failing_connects: u32,
    hang_connects: bool,
    fail_discovery: bool,
    fail_writes_after: Option<usize>,
    hang_writes: bool,
    connect_calls: u32,
    disconnect_calls: u32,
    discovery_calls: u32,
    writes: Vec<BedCommand>,
}

/// Cloneable handle; clones share the same simulated peripheral.
#[derive(Debug, Clone, Default)]
pub struct SimulatedTransport {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// No handle resolves for the address.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// The next `count` connect attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.state().failing_connects = count;
    }

    /// Connect attempts never complete.
    pub fn hang_connects(&self, hang: bool) {
        self.state().hang_connects = hang;
    }

    pub fn fail_discovery(&self, fail: bool) {
        self.state().fail_discovery = fail;
    }

    /// Writes fail once `count` more have succeeded.
    pub fn fail_writes_after(&self, count: usize) {
        let mut state = self.state();
        state.fail_writes_after = Some(state.writes.len() + count);
    }

    pub fn clear_write_faults(&self) {
        let mut state = self.state();
        state.fail_writes_after = None;
        state.hang_writes = false;
    }

    /// Writes never complete.
    pub fn hang_writes(&self, hang: bool) {
        self.state().hang_writes = hang;
    }

    /// The peripheral drops the link without being asked to.
    pub fn drop_link(&self) {
        self.state().connected = false;
    }

    pub fn connected(&self) -> bool {
        self.state().connected
    }

    pub fn connect_calls(&self) -> u32 {
        self.state().connect_calls
    }

    pub fn disconnect_calls(&self) -> u32 {
        self.state().disconnect_calls
    }

    pub fn discovery_calls(&self) -> u32 {
        self.state().discovery_calls
    }

    pub fn writes(&self) -> Vec<BedCommand> {
        self.state().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.state().writes.len()
    }
}

#[async_trait]
impl BedTransport for SimulatedTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let hang = {
            let mut state = self.state();
            if state.unavailable {
                return Err(TransportError::Unavailable("simulated".into()));
            }
            if state.connected {
                return Ok(());
            }
            state.connect_calls += 1;
            state.hang_connects
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = self.state();
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(TransportError::Rejected("simulated connect failure".into()));
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.connected {
            state.disconnect_calls += 1;
            state.connected = false;
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.state().connected
    }

    async fn discover_services(&self) -> Result<(), TransportError> {
        let mut state = self.state();
        state.discovery_calls += 1;
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if state.fail_discovery {
            return Err(TransportError::CharacteristicNotFound(COMMAND_CHAR_UUID));
        }
        Ok(())
    }

    async fn write(&self, payload: &[u8]) -> Result<(), TransportError> {
        if self.state().hang_writes {
            std::future::pending::<()>().await;
        }
        // Yield like a real GATT round trip so concurrent callers interleave.
        tokio::task::yield_now().await;

        let mut state = self.state();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if state
            .fail_writes_after
            .is_some_and(|limit| state.writes.len() >= limit)
        {
            return Err(TransportError::Rejected("simulated write failure".into()));
        }
        let command = BedCommand::from_bytes(payload)
            .ok_or_else(|| TransportError::Rejected(format!("unknown opcode {:02X?}", payload)))?;
        trace!("Simulated bed received {:?}", command);
        state.writes.push(command);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_failures_then_success() {
        let sim = SimulatedTransport::new();
        sim.fail_next_connects(1);
        assert!(sim.connect().await.is_err());
        assert!(sim.connect().await.is_ok());
        assert!(sim.is_connected().await);
        // Idempotent while connected.
        assert!(sim.connect().await.is_ok());
        assert_eq!(sim.connect_calls(), 2);
    }

    #[tokio::test]
    async fn test_write_requires_link() {
        let sim = SimulatedTransport::new();
        assert!(matches!(
            sim.write(BedCommand::HeadUp.as_bytes()).await,
            Err(TransportError::NotConnected)
        ));
        sim.connect().await.unwrap();
        sim.write(BedCommand::HeadUp.as_bytes()).await.unwrap();
        assert!(sim.write(&[0x42, 0x00]).await.is_err());
        assert_eq!(sim.writes(), vec![BedCommand::HeadUp]);
    }

    #[tokio::test]
    async fn test_disconnect_idempotent() {
        let sim = SimulatedTransport::new();
        sim.disconnect().await.unwrap();
        sim.connect().await.unwrap();
        sim.disconnect().await.unwrap();
        sim.disconnect().await.unwrap();
        assert_eq!(sim.disconnect_calls(), 1);
    }
}
