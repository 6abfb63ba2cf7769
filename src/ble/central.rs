//! btleplug-backed heart rate central (feature `ble-central`)
//!
//! Scans for a peripheral advertising the standard Heart Rate service,
//! connects, subscribes to the measurement characteristic and pumps each
//! notification value into the [`HeartRateSensor`] channel.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Manager, Peripheral};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::gatt::{HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID};
use super::transport::HeartRateSensor;
use super::BleError;
use crate::flow::lock;

const SCAN_POLL: Duration = Duration::from_millis(250);

fn map_btleplug_error(err: btleplug::Error) -> BleError {
    match err {
        btleplug::Error::PermissionDenied => BleError::PermissionDenied,
        btleplug::Error::NotConnected => BleError::Disconnected,
        btleplug::Error::TimedOut(_) => BleError::Timeout,
        btleplug::Error::DeviceNotFound => BleError::ConnectionError("device not found".into()),
        other => BleError::GattError(other.to_string()),
    }
}

/// A real heart rate strap or watch reached through the host's BLE stack.
pub struct BtleplugHeartRateSensor {
    name: String,
    peripheral: Peripheral,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl BtleplugHeartRateSensor {
    /// Scan the first adapter until a Heart Rate peripheral shows up.
    ///
    /// `name_prefix` narrows the match to devices whose advertised name
    /// starts with it. Returns `BleError::Unavailable` when the host has no
    /// adapter and `BleError::Timeout` when nothing matched in time.
    pub async fn discover(name_prefix: Option<&str>, timeout: Duration) -> Result<Self, BleError> {
        let manager = Manager::new().await.map_err(map_btleplug_error)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(map_btleplug_error)?
            .into_iter()
            .next()
            .ok_or_else(|| BleError::Unavailable("no Bluetooth adapter found".into()))?;

        adapter
            .start_scan(ScanFilter {
                services: vec![HEART_RATE_SERVICE_UUID],
            })
            .await
            .map_err(|e| BleError::ScanError(e.to_string()))?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let peripherals = adapter
                .peripherals()
                .await
                .map_err(|e| BleError::ScanError(e.to_string()))?;

            for peripheral in peripherals {
                let Ok(Some(props)) = peripheral.properties().await else {
                    continue;
                };
                let name = props.local_name.clone().unwrap_or_default();
                let name_matches = name_prefix.map_or(true, |prefix| name.starts_with(prefix));
                if props.services.contains(&HEART_RATE_SERVICE_UUID) && name_matches {
                    let _ = adapter.stop_scan().await;
                    log::info!("Found heart rate sensor {:?} ({})", name, props.address);
                    return Ok(Self {
                        name,
                        peripheral,
                        pump: Mutex::new(None),
                    });
                }
            }

            if tokio::time::Instant::now() >= deadline {
                let _ = adapter.stop_scan().await;
                return Err(BleError::Timeout);
            }
            tokio::time::sleep(SCAN_POLL).await;
        }
    }
}

#[async_trait]
impl HeartRateSensor for BtleplugHeartRateSensor {
    async fn subscribe(&self) -> Result<mpsc::Receiver<Vec<u8>>, BleError> {
        if !self.peripheral.is_connected().await.map_err(map_btleplug_error)? {
            self.peripheral.connect().await.map_err(map_btleplug_error)?;
        }
        self.peripheral
            .discover_services()
            .await
            .map_err(map_btleplug_error)?;

        let characteristic = self
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == HEART_RATE_MEASUREMENT_UUID)
            .ok_or_else(|| {
                BleError::GattError("heart rate measurement characteristic missing".into())
            })?;

        self.peripheral
            .subscribe(&characteristic)
            .await
            .map_err(map_btleplug_error)?;
        let mut notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(map_btleplug_error)?;

        let (tx, rx) = mpsc::channel(64);
        let handle = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != HEART_RATE_MEASUREMENT_UUID {
                    continue;
                }
                if tx.send(notification.value).await.is_err() {
                    break;
                }
            }
        });

        if let Some(previous) = lock(&self.pump).replace(handle) {
            previous.abort();
        }
        Ok(rx)
    }

    async fn disconnect(&self) -> Result<(), BleError> {
        if let Some(handle) = lock(&self.pump).take() {
            handle.abort();
        }
        self.peripheral
            .disconnect()
            .await
            .map_err(map_btleplug_error)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
