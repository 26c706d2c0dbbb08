//! Device discovery for both link media.
//!
//! - [`serial`] enumerates serial ports and orders probe candidates.
//! - [`ble`] scans for peripherals advertising the Lumideck GATT service.
//!
//! Neither module opens a session; they only produce ordered candidate
//! lists.  The link manager owns probing and handshake verification.

use thiserror::Error;

pub mod ble;
pub mod serial;

/// Error type for discovery operations.
#[derive(Debug, Error)]
pub enum LocatorError {
    /// No Bluetooth adapter is present on this host.
    #[error("no bluetooth adapter available")]
    NoAdapter,
    /// The Bluetooth stack reported an error.
    #[error("bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),
    /// Serial port enumeration failed.
    #[error("serial enumeration failed: {0}")]
    SerialEnumeration(#[from] serialport::Error),
}
