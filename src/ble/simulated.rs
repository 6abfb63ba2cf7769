//! Bluetooth without radios
//!
//! [`SimBleNetwork`] is a shared medium: adverts fan out to every scanner,
//! and connecting to an address hands the far end of an in-memory link to
//! whoever advertises there. [`SimHeartRateSensor`] replays measurement
//! frames on a timer. The tests run on these, and so can a host with
//! Bluetooth switched off.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::gatt::encode_heart_rate_measurement;
use super::transport::{
    BleAddress, BleAdvertisement, BleCentral, BleConnection, BlePeripheral, HeartRateSensor,
};
use super::BleError;
use crate::flow::lock;

const ADVERT_BACKLOG: usize = 256;
const PENDING_LINKS: usize = 16;
const LINK_BUFFER: usize = 64;
const DEFAULT_MTU: usize = 512;

type LinkInbox = mpsc::Sender<Box<dyn BleConnection>>;

pub struct SimBleNetwork {
    air: broadcast::Sender<BleAdvertisement>,
    /// Advertising devices and where their incoming links are delivered.
    listening: Mutex<HashMap<BleAddress, LinkInbox>>,
}

impl SimBleNetwork {
    pub fn new() -> Arc<Self> {
        let (air, _) = broadcast::channel(ADVERT_BACKLOG);
        Arc::new(Self {
            air,
            listening: Mutex::new(HashMap::new()),
        })
    }

    pub fn create_device(self: &Arc<Self>) -> SimBleDevice {
        let (inbox, pending) = mpsc::channel(PENDING_LINKS);
        SimBleDevice {
            address: BleAddress::Simulated(Uuid::new_v4()),
            network: Arc::clone(self),
            mtu: DEFAULT_MTU,
            inbox,
            pending: Mutex::new(pending),
        }
    }
}

/// One phone on a [`SimBleNetwork`]. Plays either role.
pub struct SimBleDevice {
    address: BleAddress,
    network: Arc<SimBleNetwork>,
    mtu: usize,
    inbox: LinkInbox,
    pending: Mutex<mpsc::Receiver<Box<dyn BleConnection>>>,
}

impl SimBleDevice {
    pub fn address(&self) -> &BleAddress {
        &self.address
    }

    /// Largest frame that links dialled from this device will carry.
    pub fn set_mtu(&mut self, mtu: usize) {
        self.mtu = mtu;
    }
}

/// One end of an in-memory link. Both ends share a single up flag, so
/// hanging up either end takes the link down for both.
pub struct SimBleConnection {
    outgoing: mpsc::Sender<Vec<u8>>,
    incoming: Mutex<mpsc::Receiver<Vec<u8>>>,
    up: Arc<AtomicBool>,
    peer: BleAddress,
    mtu: usize,
}

/// Returns `(central end, peripheral end)`.
fn sim_link(
    central: BleAddress,
    peripheral: BleAddress,
    mtu: usize,
) -> (SimBleConnection, SimBleConnection) {
    let (to_peripheral, from_central) = mpsc::channel(LINK_BUFFER);
    let (to_central, from_peripheral) = mpsc::channel(LINK_BUFFER);
    let up = Arc::new(AtomicBool::new(true));
    let central_end = SimBleConnection {
        outgoing: to_peripheral,
        incoming: Mutex::new(from_peripheral),
        up: Arc::clone(&up),
        peer: peripheral,
        mtu,
    };
    let peripheral_end = SimBleConnection {
        outgoing: to_central,
        incoming: Mutex::new(from_central),
        up,
        peer: central,
        mtu,
    };
    (central_end, peripheral_end)
}

#[async_trait]
impl BleConnection for SimBleConnection {
    async fn send(&self, data: &[u8]) -> Result<(), BleError> {
        if !self.is_connected() {
            return Err(BleError::Disconnected);
        }
        if data.len() > self.mtu {
            return Err(BleError::MtuExceeded {
                size: data.len(),
                mtu: self.mtu,
            });
        }
        self.outgoing
            .send(data.to_vec())
            .await
            .map_err(|_| BleError::Disconnected)
    }

    async fn recv(&self) -> Result<Vec<u8>, BleError> {
        if !self.is_connected() {
            return Err(BleError::Disconnected);
        }
        let frame = self.incoming.lock().await.recv().await;
        match frame {
            Some(frame) if self.is_connected() => Ok(frame),
            _ => Err(BleError::Disconnected),
        }
    }

    async fn disconnect(&self) -> Result<(), BleError> {
        self.up.store(false, Ordering::SeqCst);
        // An empty frame wakes a peer parked in recv().
        let _ = self.outgoing.try_send(Vec::new());
        Ok(())
    }

    fn peer_address(&self) -> &BleAddress {
        &self.peer
    }

    fn is_connected(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BleCentral for SimBleDevice {
    fn advertisements(&self) -> broadcast::Receiver<BleAdvertisement> {
        self.network.air.subscribe()
    }

    async fn connect(&self, address: &BleAddress) -> Result<Box<dyn BleConnection>, BleError> {
        let inbox = self
            .network
            .listening
            .lock()
            .await
            .get(address)
            .cloned()
            .ok_or_else(|| BleError::ConnectionError(format!("nothing advertising at {}", address)))?;

        let (mine, theirs) = sim_link(self.address.clone(), address.clone(), self.mtu);
        inbox.send(Box::new(theirs)).await.map_err(|_| {
            BleError::ConnectionError(format!("{} stopped taking connections", address))
        })?;
        Ok(Box::new(mine))
    }
}

#[async_trait]
impl BlePeripheral for SimBleDevice {
    async fn start_advertising(&self, data: Vec<u8>) -> Result<(), BleError> {
        self.network
            .listening
            .lock()
            .await
            .insert(self.address.clone(), self.inbox.clone());
        // Nobody scanning is fine.
        let _ = self.network.air.send(BleAdvertisement {
            data,
            rssi: None,
            source_address: self.address.clone(),
        });
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), BleError> {
        self.network.listening.lock().await.remove(&self.address);
        Ok(())
    }

    async fn accept(&self) -> Result<Box<dyn BleConnection>, BleError> {
        self.pending
            .lock()
            .await
            .recv()
            .await
            .ok_or(BleError::Disconnected)
    }
}

/// What a simulated sensor does once subscribed.
#[derive(Clone, Debug)]
enum SensorScript {
    Frames {
        frames: Vec<Vec<u8>>,
        interval: Duration,
        hold_open: bool,
    },
    Fail(BleError),
}

/// A scripted heart rate peripheral.
///
/// Streams its frames one `interval` apart, then drops the link unless
/// [`SimHeartRateSensor::hold_open`] was requested.
pub struct SimHeartRateSensor {
    name: String,
    script: SensorScript,
    link: StdMutex<Option<JoinHandle<()>>>,
}

impl SimHeartRateSensor {
    /// Stream raw frames exactly as given, malformed ones included.
    pub fn scripted(name: &str, frames: Vec<Vec<u8>>, interval: Duration) -> Self {
        Self {
            name: name.to_string(),
            script: SensorScript::Frames {
                frames,
                interval,
                hold_open: false,
            },
            link: StdMutex::new(None),
        }
    }

    /// Stream one well-formed frame per heart rate, one second apart, each
    /// carrying the matching RR interval.
    pub fn from_rates(name: &str, rates: &[u16]) -> Self {
        let frames = rates
            .iter()
            .map(|&bpm| {
                let rr = if bpm == 0 { 0 } else { 60_000 / bpm as u32 };
                encode_heart_rate_measurement(bpm, &[rr])
            })
            .collect();
        Self::scripted(name, frames, Duration::from_secs(1))
    }

    /// A sensor whose subscription always fails with `error`.
    pub fn unavailable(name: &str, error: BleError) -> Self {
        Self {
            name: name.to_string(),
            script: SensorScript::Fail(error),
            link: StdMutex::new(None),
        }
    }

    /// Keep the link up after the script ends, until `disconnect()`.
    pub fn hold_open(mut self) -> Self {
        if let SensorScript::Frames { hold_open, .. } = &mut self.script {
            *hold_open = true;
        }
        self
    }

    pub fn is_linked(&self) -> bool {
        lock(&self.link)
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

#[async_trait]
impl HeartRateSensor for SimHeartRateSensor {
    async fn subscribe(&self) -> Result<mpsc::Receiver<Vec<u8>>, BleError> {
        let (frames, interval, hold_open) = match &self.script {
            SensorScript::Fail(error) => return Err(error.clone()),
            SensorScript::Frames {
                frames,
                interval,
                hold_open,
            } => (frames.clone(), *interval, *hold_open),
        };

        let (tx, rx) = mpsc::channel(32);
        let handle = tokio::spawn(async move {
            for frame in frames {
                tokio::time::sleep(interval).await;
                if tx.send(frame).await.is_err() {
                    return;
                }
            }
            if hold_open {
                tx.closed().await;
            }
        });

        if let Some(previous) = lock(&self.link).replace(handle) {
            previous.abort();
        }
        Ok(rx)
    }

    async fn disconnect(&self) -> Result<(), BleError> {
        if let Some(handle) = lock(&self.link).take() {
            handle.abort();
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connected_pair(network: &Arc<SimBleNetwork>) -> (Box<dyn BleConnection>, Box<dyn BleConnection>) {
        let central = network.create_device();
        let peripheral = network.create_device();
        let addr = peripheral.address().clone();

        peripheral.start_advertising(vec![0x01]).await.unwrap();
        let accept_handle = tokio::spawn(async move { peripheral.accept().await.unwrap() });
        let conn_a = central.connect(&addr).await.unwrap();
        let conn_b = accept_handle.await.unwrap();
        (conn_a, conn_b)
    }

    #[tokio::test]
    async fn test_advertisement_reaches_scanners() {
        let network = SimBleNetwork::new();
        let advertiser = network.create_device();
        let scanner = network.create_device();
        let mut rx = scanner.advertisements();

        advertiser.start_advertising(vec![0xAA, 0xBB]).await.unwrap();

        let adv = rx.recv().await.unwrap();
        assert_eq!(adv.data, vec![0xAA, 0xBB]);
        assert_eq!(adv.source_address, *advertiser.address());
    }

    #[tokio::test]
    async fn test_bidirectional_data_transfer() {
        let network = SimBleNetwork::new();
        let (conn_a, conn_b) = connected_pair(&network).await;

        conn_a.send(b"lub").await.unwrap();
        assert_eq!(conn_b.recv().await.unwrap(), b"lub");
        conn_b.send(b"dub").await.unwrap();
        assert_eq!(conn_a.recv().await.unwrap(), b"dub");
    }

    #[tokio::test]
    async fn test_disconnect_is_seen_by_both_ends() {
        let network = SimBleNetwork::new();
        let (conn_a, conn_b) = connected_pair(&network).await;

        conn_a.disconnect().await.unwrap();
        assert!(!conn_a.is_connected());
        assert!(!conn_b.is_connected());
        assert!(conn_b.recv().await.is_err());
        assert_eq!(conn_a.send(b"x").await, Err(BleError::Disconnected));
    }

    #[tokio::test]
    async fn test_connect_to_silent_address_fails() {
        let network = SimBleNetwork::new();
        let central = network.create_device();
        let result = central.connect(&BleAddress::Simulated(Uuid::nil())).await;
        assert!(matches!(result, Err(BleError::ConnectionError(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_sensor_streams_then_drops_link() {
        let sensor = SimHeartRateSensor::from_rates("HRM-Sim", &[60, 75]);
        let mut rx = sensor.subscribe().await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), encode_heart_rate_measurement(60, &[1000]));
        assert_eq!(rx.recv().await.unwrap(), encode_heart_rate_measurement(75, &[800]));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_sensor_closes_on_disconnect() {
        let sensor = SimHeartRateSensor::from_rates("HRM-Sim", &[70]).hold_open();
        let mut rx = sensor.subscribe().await.unwrap();
        rx.recv().await.unwrap();
        assert!(sensor.is_linked());

        sensor.disconnect().await.unwrap();
        assert!(rx.recv().await.is_none());
        assert!(!sensor.is_linked());
    }

    #[tokio::test]
    async fn test_unavailable_sensor_reports_error() {
        let sensor = SimHeartRateSensor::unavailable("HRM-Off", BleError::PermissionDenied);
        let err = sensor.subscribe().await.unwrap_err();
        assert!(err.is_hardware_unavailable());
    }
}
