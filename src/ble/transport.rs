//! Radio-facing traits
//!
//! Two kinds of peers sit behind these traits. A [`HeartRateSensor`] is a
//! strap or watch that streams Heart Rate Measurement values. The
//! central/peripheral/connection trio carries session traffic between two
//! phones. [`super::simulated`] implements all of them in memory;
//! [`super::central`] implements the sensor over btleplug.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use super::BleError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BleAddress {
    /// Hardware MAC, most significant byte first.
    Real([u8; 6]),
    /// A device on a [`super::simulated::SimBleNetwork`].
    Simulated(Uuid),
}

impl fmt::Display for BleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BleAddress::Real(mac) => {
                let parts: Vec<String> = mac.iter().map(|b| format!("{:02X}", b)).collect();
                f.write_str(&parts.join(":"))
            }
            BleAddress::Simulated(id) => write!(f, "sim-{}", id),
        }
    }
}

/// One advertisement heard while scanning.
#[derive(Debug, Clone)]
pub struct BleAdvertisement {
    pub data: Vec<u8>,
    pub rssi: Option<i16>,
    pub source_address: BleAddress,
}

impl BleAdvertisement {
    pub fn has_payload(&self, payload: &[u8]) -> bool {
        self.data == payload
    }
}

/// A heart rate strap or watch.
#[async_trait]
pub trait HeartRateSensor: Send + Sync {
    /// Link up and start notifications. Each item is one raw measurement
    /// value; the channel closes when the link goes away.
    async fn subscribe(&self) -> Result<mpsc::Receiver<Vec<u8>>, BleError>;

    async fn disconnect(&self) -> Result<(), BleError>;

    fn name(&self) -> &str;
}

/// A link to another phone. Each `send` is delivered as one `recv`.
#[async_trait]
pub trait BleConnection: Send + Sync {
    async fn send(&self, data: &[u8]) -> Result<(), BleError>;

    /// Next frame from the peer. Fails with [`BleError::Disconnected`] once
    /// either side hangs up.
    async fn recv(&self) -> Result<Vec<u8>, BleError>;

    async fn disconnect(&self) -> Result<(), BleError>;

    fn peer_address(&self) -> &BleAddress;

    fn is_connected(&self) -> bool;
}

/// The joining side: listens for adverts and dials out.
#[async_trait]
pub trait BleCentral: Send + Sync {
    /// Adverts heard from now on.
    fn advertisements(&self) -> broadcast::Receiver<BleAdvertisement>;

    async fn connect(&self, address: &BleAddress) -> Result<Box<dyn BleConnection>, BleError>;
}

/// The hosting side: advertises a payload and takes incoming links.
#[async_trait]
pub trait BlePeripheral: Send + Sync {
    /// Advertise `data`, replacing any previous payload. Links are
    /// accepted while advertising.
    async fn start_advertising(&self, data: Vec<u8>) -> Result<(), BleError>;

    async fn stop_advertising(&self) -> Result<(), BleError>;

    /// Wait for the next central to connect.
    async fn accept(&self) -> Result<Box<dyn BleConnection>, BleError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addresses_print_readably() {
        let strap = BleAddress::Real([0xC0, 0xFF, 0xEE, 0x00, 0x11, 0x22]);
        assert_eq!(strap.to_string(), "C0:FF:EE:00:11:22");
        assert_ne!(strap, BleAddress::Simulated(Uuid::nil()));
        assert!(BleAddress::Simulated(Uuid::nil()).to_string().starts_with("sim-"));
    }

    #[test]
    fn test_payload_match_is_exact() {
        let adv = BleAdvertisement {
            data: b"PULSE".to_vec(),
            rssi: Some(-60),
            source_address: BleAddress::Simulated(Uuid::nil()),
        };
        assert!(adv.has_payload(b"PULSE"));
        assert!(!adv.has_payload(b"PULS"));
    }
}
