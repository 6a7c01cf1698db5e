//! Bluetooth Module
//!
//! Provides the BLE transport used by the bed session.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  session::BedSession                     │
//! │   (connection state, idle disconnect, movement loops)    │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ BedTransport
//!         ┌─────────────┼─────────────┬──────────────┐
//!         │             │             │              │
//!         ▼             ▼             ▼              ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐  ┌───────────┐
//! │  Scanner  │  │ Connection │  │ Protocol │  │ Simulated │
//! │           │  │            │  │          │  │           │
//! │ - resolve │  │ - btleplug │  │ - UUID   │  │ - dry run │
//! │ - link    │  │   GATT     │  │ - opcodes│  │ - faults  │
//! │   events  │  │   writes   │  │          │  │           │
//! └───────────┘  └────────────┘  └──────────┘  └───────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Command characteristic UUID and opcode vocabulary
//! - [`transport`] - The adapter trait the session consumes
//! - [`connection`] - btleplug implementation of the adapter
//! - [`scanner`] - Address resolution and connectivity watcher
//! - [`simulated`] - In-memory bed with fault injection

pub mod connection;
pub mod protocol;
pub mod scanner;
pub mod simulated;
pub mod transport;

pub use connection::{BtleplugTransport, ConnectionConfig};
pub use protocol::BedCommand;
pub use simulated::SimulatedTransport;
pub use transport::BedTransport;
