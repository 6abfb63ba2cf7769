//! Session transports
//!
//! A [`SessionTransport`] carries [`SessionMessage`]s between the host and
//! its partners. [`BleSessionTransport`] does it over a BLE link;
//! [`LoopbackTransport`] stands in for a missing partner with a simulated
//! one whose heart beats on its own.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use super::{JoinCode, Participant, SessionConfig, SessionInfo, SessionMode};
use crate::ble::transport::{BleAddress, BleCentral, BleConnection, BlePeripheral};
use crate::ble::BleError;
use crate::flow::lock;
use crate::source::{SimulatorConfig, SimulatorModel};
use crate::types::heartrate::interval_for_bpm;
use crate::types::BeatEvent;

/// Prefix of every session advertisement.
pub const SESSION_ADV_MARKER: &[u8] = b"PULSE-SESSION-V1";

const CODE_DIGEST_LEN: usize = 8;
const INCOMING_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("BLE error: {0}")]
    Ble(#[from] BleError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("No session found for code {0}")]
    NotFound(JoinCode),

    #[error("Join rejected: {0}")]
    Rejected(String),

    #[error("Transport not connected")]
    NotConnected,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// What participants say to each other once a session is running.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum SessionMessage {
    Joined { participant: Participant },
    Beat { participant_id: Uuid, beat: BeatEvent },
    Left { participant_id: Uuid },
    Ended,
}

#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Host side: make `session` discoverable under its join code.
    async fn announce(&self, session: &SessionInfo) -> Result<(), TransportError>;

    /// Joiner side: find the host for `code` and introduce `participant`.
    /// Returns the host's view of the session.
    async fn join(
        &self,
        code: &JoinCode,
        participant: &Participant,
    ) -> Result<SessionInfo, TransportError>;

    /// Deliver a message to every other participant.
    async fn send(&self, message: SessionMessage) -> Result<(), TransportError>;

    /// Messages from the other participants. Can be taken once per
    /// `announce`/`join`; closes when the transport is closed or the host
    /// goes away.
    async fn incoming(&self) -> Result<mpsc::Receiver<SessionMessage>, TransportError>;

    /// Tear down links and background tasks. Safe to call repeatedly.
    async fn close(&self) -> Result<(), TransportError>;

    /// True when the partner is reached over a real link.
    fn is_live(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Loopback
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LoopbackInner {
    incoming: Option<mpsc::Receiver<SessionMessage>>,
    peer: Option<JoinHandle<()>>,
    sent: usize,
}

/// A transport whose partner is simulated locally.
pub struct LoopbackTransport {
    peer_name: String,
    heart: SimulatorConfig,
    inner: Mutex<LoopbackInner>,
}

impl LoopbackTransport {
    pub fn new(peer_name: impl Into<String>, heart: SimulatorConfig) -> Self {
        Self {
            peer_name: peer_name.into(),
            heart,
            inner: Mutex::new(LoopbackInner::default()),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.loopback_peer_name.clone(), config.loopback_heart.clone())
    }

    /// Messages handed to the simulated partner so far.
    pub fn sent_count(&self) -> usize {
        lock(&self.inner).sent
    }

    fn spawn_peer(&self, peer: Participant, introduce: bool) -> Result<(), TransportError> {
        let model = SimulatorModel::new(&self.heart)
            .map_err(|e| TransportError::Protocol(format!("simulated partner: {}", e)))?;
        let mut rng = match self.heart.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let (tx, rx) = mpsc::channel(INCOMING_CAPACITY);
        let task = tokio::spawn(async move {
            if introduce
                && tx
                    .send(SessionMessage::Joined {
                        participant: peer.clone(),
                    })
                    .await
                    .is_err()
            {
                return;
            }
            let started = Instant::now();
            loop {
                let bpm = model.next_bpm(started.elapsed(), &mut rng);
                let interval = interval_for_bpm(bpm);
                tokio::time::sleep(Duration::from_millis(interval as u64)).await;
                let message = SessionMessage::Beat {
                    participant_id: peer.id,
                    beat: BeatEvent::new(bpm, interval),
                };
                if tx.send(message).await.is_err() {
                    break;
                }
            }
        });

        let mut inner = lock(&self.inner);
        if let Some(previous) = inner.peer.replace(task) {
            previous.abort();
        }
        inner.incoming = Some(rx);
        Ok(())
    }
}

#[async_trait]
impl SessionTransport for LoopbackTransport {
    async fn announce(&self, session: &SessionInfo) -> Result<(), TransportError> {
        log::info!(
            "No live transport for session {}, simulating a partner",
            session.join_code
        );
        self.spawn_peer(Participant::new(self.peer_name.clone()), true)
    }

    async fn join(
        &self,
        code: &JoinCode,
        _participant: &Participant,
    ) -> Result<SessionInfo, TransportError> {
        let host = Participant::new(self.peer_name.clone());
        let session = SessionInfo::new(code.clone(), SessionMode::Sync, host.clone());
        self.spawn_peer(host, false)?;
        log::info!("Joined simulated session {}", code);
        Ok(session)
    }

    async fn send(&self, message: SessionMessage) -> Result<(), TransportError> {
        let mut inner = lock(&self.inner);
        if inner.peer.is_none() {
            return Err(TransportError::NotConnected);
        }
        inner.sent += 1;
        log::trace!("Loopback partner received {:?}", message);
        Ok(())
    }

    async fn incoming(&self) -> Result<mpsc::Receiver<SessionMessage>, TransportError> {
        lock(&self.inner)
            .incoming
            .take()
            .ok_or(TransportError::NotConnected)
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut inner = lock(&self.inner);
        if let Some(peer) = inner.peer.take() {
            peer.abort();
        }
        inner.incoming = None;
        Ok(())
    }

    fn is_live(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// BLE
// ---------------------------------------------------------------------------

/// Frames on the session link.
#[derive(Serialize, Deserialize, Clone, Debug)]
enum WireMessage {
    JoinRequest {
        code: String,
        participant: Participant,
    },
    JoinAccepted {
        session: SessionInfo,
    },
    JoinRejected {
        reason: String,
    },
    Session(SessionMessage),
}

fn cbor_serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, TransportError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| TransportError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn cbor_deserialize<T: DeserializeOwned>(data: &[u8]) -> Result<T, TransportError> {
    ciborium::from_reader(data).map_err(|e| TransportError::Serialization(e.to_string()))
}

async fn send_wire(conn: &dyn BleConnection, msg: &WireMessage) -> Result<(), TransportError> {
    let bytes = cbor_serialize(msg)?;
    conn.send(&bytes).await?;
    Ok(())
}

async fn recv_wire(conn: &dyn BleConnection) -> Result<WireMessage, TransportError> {
    let bytes = conn.recv().await?;
    cbor_deserialize(&bytes)
}

/// Advertisement payload for a join code: the marker followed by a digest
/// of the code, so scanners cannot read the code off the air.
pub fn advertisement_payload(code: &JoinCode) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(SESSION_ADV_MARKER);
    hasher.update(code.as_str().as_bytes());
    let digest = hasher.finalize();
    let mut payload = SESSION_ADV_MARKER.to_vec();
    payload.extend_from_slice(&digest[..CODE_DIGEST_LEN]);
    payload
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    Host,
    Joiner,
}

struct Peer {
    participant_id: Uuid,
    conn: Arc<dyn BleConnection>,
}

#[derive(Default)]
struct BleShared {
    role: Option<Role>,
    incoming_tx: Option<mpsc::Sender<SessionMessage>>,
    incoming_rx: Option<mpsc::Receiver<SessionMessage>>,
    peers: Vec<Peer>,
    tasks: Vec<JoinHandle<()>>,
}

/// Sessions over BLE: the host advertises and accepts, joiners scan and
/// connect. Frames are CBOR.
pub struct BleSessionTransport {
    central: Arc<dyn BleCentral>,
    peripheral: Arc<dyn BlePeripheral>,
    join_timeout: Duration,
    advertise_interval: Duration,
    shared: Arc<Mutex<BleShared>>,
}

impl BleSessionTransport {
    pub fn new(
        central: Arc<dyn BleCentral>,
        peripheral: Arc<dyn BlePeripheral>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            central,
            peripheral,
            join_timeout: Duration::from_millis(config.join_timeout_ms),
            advertise_interval: Duration::from_millis(config.advertise_interval_ms.max(1)),
            shared: Arc::new(Mutex::new(BleShared::default())),
        }
    }

    pub fn peer_count(&self) -> usize {
        lock(&self.shared).peers.len()
    }

    /// Fresh incoming channel for a new session. Returns the sender.
    fn reset(&self, role: Role) -> mpsc::Sender<SessionMessage> {
        let (tx, rx) = mpsc::channel(INCOMING_CAPACITY);
        let mut shared = lock(&self.shared);
        for task in shared.tasks.drain(..) {
            task.abort();
        }
        shared.peers.clear();
        shared.role = Some(role);
        shared.incoming_tx = Some(tx.clone());
        shared.incoming_rx = Some(rx);
        tx
    }
}

/// Pump session messages from one link into the incoming channel.
/// Reports the peer as gone when the link drops.
fn spawn_reader(
    conn: Arc<dyn BleConnection>,
    peer_id: Uuid,
    shared: Arc<Mutex<BleShared>>,
    tx: mpsc::Sender<SessionMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match recv_wire(conn.as_ref()).await {
                Ok(WireMessage::Session(message)) => {
                    if tx.send(message).await.is_err() {
                        return;
                    }
                }
                Ok(other) => log::debug!("Ignoring handshake frame mid-session: {:?}", other),
                Err(TransportError::Serialization(e)) => {
                    log::warn!("Dropping undecodable session frame: {}", e)
                }
                Err(e) => {
                    log::info!("Session link to {} closed: {}", peer_id, e);
                    break;
                }
            }
        }
        lock(&shared)
            .peers
            .retain(|peer| !Arc::ptr_eq(&peer.conn, &conn));
        let _ = tx
            .send(SessionMessage::Left {
                participant_id: peer_id,
            })
            .await;
    })
}

async fn host_accept_loop(
    peripheral: Arc<dyn BlePeripheral>,
    session: SessionInfo,
    shared: Arc<Mutex<BleShared>>,
    tx: mpsc::Sender<SessionMessage>,
) {
    loop {
        let conn: Arc<dyn BleConnection> = match peripheral.accept().await {
            Ok(conn) => Arc::from(conn),
            Err(e) => {
                log::warn!("Stopped accepting session partners: {}", e);
                return;
            }
        };

        let participant = match recv_wire(conn.as_ref()).await {
            Ok(WireMessage::JoinRequest { code, participant })
                if code == session.join_code.as_str() =>
            {
                participant
            }
            Ok(WireMessage::JoinRequest { .. }) => {
                log::info!("Rejecting join with wrong code");
                let reject = WireMessage::JoinRejected {
                    reason: "wrong join code".into(),
                };
                let _ = send_wire(conn.as_ref(), &reject).await;
                let _ = conn.disconnect().await;
                continue;
            }
            Ok(other) => {
                log::debug!("Expected JoinRequest, got {:?}", other);
                let _ = conn.disconnect().await;
                continue;
            }
            Err(e) => {
                log::debug!("Join handshake failed: {}", e);
                let _ = conn.disconnect().await;
                continue;
            }
        };

        let mut view = session.clone();
        view.add_participant(participant.clone());
        if let Err(e) = send_wire(conn.as_ref(), &WireMessage::JoinAccepted { session: view }).await
        {
            log::warn!("Could not accept {}: {}", participant.name, e);
            continue;
        }

        log::info!("{} joined session {}", participant.name, session.join_code);
        let reader = spawn_reader(
            Arc::clone(&conn),
            participant.id,
            Arc::clone(&shared),
            tx.clone(),
        );
        {
            let mut shared = lock(&shared);
            shared.peers.push(Peer {
                participant_id: participant.id,
                conn,
            });
            shared.tasks.push(reader);
        }
        if tx
            .send(SessionMessage::Joined { participant })
            .await
            .is_err()
        {
            return;
        }
    }
}

#[async_trait]
impl SessionTransport for BleSessionTransport {
    async fn announce(&self, session: &SessionInfo) -> Result<(), TransportError> {
        let tx = self.reset(Role::Host);
        let payload = advertisement_payload(&session.join_code);
        self.peripheral.start_advertising(payload.clone()).await?;

        let peripheral = Arc::clone(&self.peripheral);
        let interval = self.advertise_interval;
        let advertiser = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = peripheral.start_advertising(payload.clone()).await {
                    log::debug!("Re-advertising failed: {}", e);
                }
            }
        });
        let acceptor = tokio::spawn(host_accept_loop(
            Arc::clone(&self.peripheral),
            session.clone(),
            Arc::clone(&self.shared),
            tx,
        ));

        let mut shared = lock(&self.shared);
        shared.tasks.push(advertiser);
        shared.tasks.push(acceptor);
        log::info!("Advertising session {}", session.join_code);
        Ok(())
    }

    async fn join(
        &self,
        code: &JoinCode,
        participant: &Participant,
    ) -> Result<SessionInfo, TransportError> {
        let mut adverts = self.central.advertisements();
        let wanted = advertisement_payload(code);
        let scan = async {
            loop {
                match adverts.recv().await {
                    Ok(adv) if adv.has_payload(&wanted) => {
                        return Ok::<BleAddress, TransportError>(adv.source_address)
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(TransportError::NotFound(code.clone()))
                    }
                }
            }
        };
        let address = tokio::time::timeout(self.join_timeout, scan)
            .await
            .map_err(|_| TransportError::NotFound(code.clone()))??;

        let conn: Arc<dyn BleConnection> = Arc::from(self.central.connect(&address).await?);
        let request = WireMessage::JoinRequest {
            code: code.to_string(),
            participant: participant.clone(),
        };
        send_wire(conn.as_ref(), &request).await?;

        match recv_wire(conn.as_ref()).await? {
            WireMessage::JoinAccepted { session } => {
                let tx = self.reset(Role::Joiner);
                let reader = spawn_reader(
                    Arc::clone(&conn),
                    session.host.id,
                    Arc::clone(&self.shared),
                    tx,
                );
                let mut shared = lock(&self.shared);
                shared.peers.push(Peer {
                    participant_id: session.host.id,
                    conn,
                });
                shared.tasks.push(reader);
                log::info!("Joined session {} hosted by {}", code, session.host.name);
                Ok(session)
            }
            WireMessage::JoinRejected { reason } => {
                let _ = conn.disconnect().await;
                Err(TransportError::Rejected(reason))
            }
            other => {
                let _ = conn.disconnect().await;
                Err(TransportError::Protocol(format!(
                    "expected JoinAccepted, got {:?}",
                    other
                )))
            }
        }
    }

    async fn send(&self, message: SessionMessage) -> Result<(), TransportError> {
        let (role, links): (Option<Role>, Vec<(Uuid, Arc<dyn BleConnection>)>) = {
            let shared = lock(&self.shared);
            let links = shared
                .peers
                .iter()
                .map(|p| (p.participant_id, Arc::clone(&p.conn)))
                .collect();
            (shared.role, links)
        };
        match role {
            None => return Err(TransportError::NotConnected),
            Some(Role::Joiner) if links.is_empty() => return Err(TransportError::NotConnected),
            _ => {}
        }

        let frame = WireMessage::Session(message);
        for (participant_id, conn) in links {
            if let Err(e) = send_wire(conn.as_ref(), &frame).await {
                log::warn!("Could not relay to {}: {}", participant_id, e);
            }
        }
        Ok(())
    }

    async fn incoming(&self) -> Result<mpsc::Receiver<SessionMessage>, TransportError> {
        lock(&self.shared)
            .incoming_rx
            .take()
            .ok_or(TransportError::NotConnected)
    }

    async fn close(&self) -> Result<(), TransportError> {
        let (role, peers) = {
            let mut shared = lock(&self.shared);
            for task in shared.tasks.drain(..) {
                task.abort();
            }
            shared.incoming_tx = None;
            shared.incoming_rx = None;
            (shared.role.take(), std::mem::take(&mut shared.peers))
        };
        for peer in peers {
            let _ = peer.conn.disconnect().await;
        }
        if role == Some(Role::Host) {
            self.peripheral.stop_advertising().await?;
        }
        Ok(())
    }

    fn is_live(&self) -> bool {
        lock(&self.shared).role.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::simulated::{SimBleDevice, SimBleNetwork};

    fn ble_transport(device: &Arc<SimBleDevice>) -> BleSessionTransport {
        BleSessionTransport::new(device.clone(), device.clone(), &SessionConfig::default())
    }

    /// Room for a whole `JoinAccepted` frame in one write.
    fn roomy_device(network: &Arc<SimBleNetwork>) -> Arc<SimBleDevice> {
        let mut device = network.create_device();
        device.set_mtu(4096);
        Arc::new(device)
    }

    #[tokio::test(start_paused = true)]
    async fn test_loopback_partner_joins_and_beats() {
        let transport = LoopbackTransport::new(
            "Sim",
            SimulatorConfig {
                seed: Some(3),
                ..SimulatorConfig::default()
            },
        );
        let host = Participant::new("Host");
        let session = SessionInfo::new(JoinCode::generate(), SessionMode::Sync, host);
        transport.announce(&session).await.unwrap();
        let mut rx = transport.incoming().await.unwrap();
        assert!(transport.incoming().await.is_err());

        let peer = match rx.recv().await.unwrap() {
            SessionMessage::Joined { participant } => participant,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(peer.name, "Sim");
        for _ in 0..3 {
            match rx.recv().await.unwrap() {
                SessionMessage::Beat {
                    participant_id,
                    beat,
                } => {
                    assert_eq!(participant_id, peer.id);
                    assert!((beat.bpm - 72.0).abs() <= 3.0);
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        transport.close().await.unwrap();
        assert!(rx.recv().await.is_none());
        assert!(transport.send(SessionMessage::Ended).await.is_err());
        assert!(!transport.is_live());
    }

    #[tokio::test]
    async fn test_advertisement_hides_code() {
        let code = JoinCode::parse("HJK789").unwrap();
        let payload = advertisement_payload(&code);
        assert!(payload.starts_with(SESSION_ADV_MARKER));
        assert_eq!(payload.len(), SESSION_ADV_MARKER.len() + CODE_DIGEST_LEN);
        assert!(!payload.windows(6).any(|w| w == b"HJK789"));
        assert_ne!(payload, advertisement_payload(&JoinCode::parse("HJK788").unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ble_join_and_relay() {
        let network = SimBleNetwork::new();
        let host_device = roomy_device(&network);
        let guest_device = roomy_device(&network);
        let host = ble_transport(&host_device);
        let guest = ble_transport(&guest_device);

        let session = SessionInfo::new(JoinCode::generate(), SessionMode::Sync, Participant::new("Host"));
        host.announce(&session).await.unwrap();
        let mut host_rx = host.incoming().await.unwrap();

        let me = Participant::new("Guest");
        let joined = guest.join(&session.join_code, &me).await.unwrap();
        assert_eq!(joined.session_id, session.session_id);
        assert!(joined.participant(me.id).is_some());
        let mut guest_rx = guest.incoming().await.unwrap();

        assert_eq!(
            host_rx.recv().await.unwrap(),
            SessionMessage::Joined {
                participant: me.clone()
            }
        );
        assert_eq!(host.peer_count(), 1);

        let beat = BeatEvent::new(66.0, 909);
        guest
            .send(SessionMessage::Beat {
                participant_id: me.id,
                beat: beat.clone(),
            })
            .await
            .unwrap();
        assert_eq!(
            host_rx.recv().await.unwrap(),
            SessionMessage::Beat {
                participant_id: me.id,
                beat
            }
        );

        host.send(SessionMessage::Ended).await.unwrap();
        assert_eq!(guest_rx.recv().await.unwrap(), SessionMessage::Ended);

        host.close().await.unwrap();
        host.close().await.unwrap();
        assert_eq!(
            guest_rx.recv().await.unwrap(),
            SessionMessage::Left {
                participant_id: session.host.id
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_unknown_code_times_out() {
        let network = SimBleNetwork::new();
        let guest_device = roomy_device(&network);
        let guest = ble_transport(&guest_device);

        let code = JoinCode::parse("ABCDEF").unwrap();
        let err = guest.join(&code, &Participant::new("Guest")).await.unwrap_err();
        assert!(matches!(err, TransportError::NotFound(ref c) if *c == code));
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_rejects_wrong_code() {
        let network = SimBleNetwork::new();
        let host_device = roomy_device(&network);
        let intruder = network.create_device();
        let host = ble_transport(&host_device);

        let session = SessionInfo::new(JoinCode::generate(), SessionMode::Sync, Participant::new("Host"));
        host.announce(&session).await.unwrap();

        let conn = intruder.connect(host_device.address()).await.unwrap();
        let request = WireMessage::JoinRequest {
            code: "ZZZZZZ".into(),
            participant: Participant::new("Mallory"),
        };
        send_wire(conn.as_ref(), &request).await.unwrap();
        assert!(matches!(
            recv_wire(conn.as_ref()).await.unwrap(),
            WireMessage::JoinRejected { .. }
        ));
        assert_eq!(host.peer_count(), 0);
    }
}
