//! Transport adapter boundary
//!
//! Thin wrapper over a GATT client. Every call may suspend and every call may
//! fail; timeouts and retries are the session controller's business.

use crate::domain::error::TransportError;
use async_trait::async_trait;

#[async_trait]
pub trait BedTransport: Send + Sync {
    /// Open the link. Succeeds immediately when already connected.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Close the link. Succeeds immediately when already disconnected.
    async fn disconnect(&self) -> Result<(), TransportError>;

    async fn is_connected(&self) -> bool;

    /// Enumerate services and confirm the command characteristic exists.
    async fn discover_services(&self) -> Result<(), TransportError>;

    /// Write one command payload to the command characteristic, with response.
    async fn write(&self, payload: &[u8]) -> Result<(), TransportError>;
}
