//! BLE layer
//!
//! Heart Rate Measurement frame parsing, the transport traits that sensors
//! and session links conform to, an in-process simulated BLE air for tests
//! and demo hosts, and an optional btleplug-backed heart rate central.

#[cfg(feature = "ble-central")]
pub mod central;
pub mod gatt;
pub mod simulated;
pub mod transport;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BleError {
    #[error("Bluetooth unavailable: {0}")]
    Unavailable(String),

    #[error("Bluetooth permission denied")]
    PermissionDenied,

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Scan error: {0}")]
    ScanError(String),

    #[error("GATT error: {0}")]
    GattError(String),

    #[error("Payload exceeds MTU ({size} > {mtu})")]
    MtuExceeded { size: usize, mtu: usize },

    #[error("Peer disconnected")]
    Disconnected,

    #[error("Operation timed out")]
    Timeout,
}

impl BleError {
    /// True when the failure means there is no usable radio at all, as
    /// opposed to a problem with one particular device.
    pub fn is_hardware_unavailable(&self) -> bool {
        matches!(self, BleError::Unavailable(_) | BleError::PermissionDenied)
    }
}
