//! Two devices sharing a heartbeat over a simulated BLE network.
//!
//! Run with:
//!   cargo test --test paired_session

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pulsesync::ble::simulated::{SimBleDevice, SimBleNetwork};
use pulsesync::haptics::{HapticsConfig, RecordingActuator};
use pulsesync::session::{BleSessionTransport, SessionConfig, SessionState};
use pulsesync::source::{Simulator, SimulatorConfig};
use pulsesync::{
    BeatSourceManager, HapticRenderer, RhythmWindow, SessionCoordinator, SessionEvent, SessionMode,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn device(network: &Arc<SimBleNetwork>) -> Arc<SimBleDevice> {
    let mut device = network.create_device();
    device.set_mtu(4096);
    Arc::new(device)
}

fn coordinator(device: &Arc<SimBleDevice>) -> Arc<SessionCoordinator> {
    Arc::new(SessionCoordinator::new(Arc::new(BleSessionTransport::new(
        device.clone(),
        device.clone(),
        &SessionConfig::default(),
    ))))
}

#[tokio::test(start_paused = true)]
async fn test_partner_feels_host_heartbeat() {
    init_logging();
    let network = SimBleNetwork::new();
    let host = coordinator(&device(&network));
    let guest = coordinator(&device(&network));

    let session = host.create_session(SessionMode::Sync, "Ada").await.unwrap();
    let joined = guest
        .join_session(session.join_code.as_str(), "Grace")
        .await
        .unwrap();
    assert_eq!(joined.session_id, session.session_id);
    assert_eq!(guest.state(), SessionState::Joined);

    // Guest keeps the host's recent beats.
    let remote = Arc::new(Mutex::new(RhythmWindow::default()));
    let sink = Arc::clone(&remote);
    let host_id = session.host.id;
    guest.events().subscribe(Box::new(move |event: &SessionEvent| {
        if let SessionEvent::RemoteBeat {
            participant_id,
            beat,
        } = event
        {
            if *participant_id == host_id {
                sink.lock().unwrap().push(beat.clone());
            }
        }
    }));

    // Host relays its own simulated heartbeat.
    let manager = BeatSourceManager::new();
    let simulator = Arc::new(Simulator::new(
        SimulatorConfig {
            base_bpm: 80.0,
            seed: Some(21),
            ..SimulatorConfig::default()
        },
        manager.emitter(),
    ));
    let mut beats = manager.beats().receiver();
    let relay_host = Arc::clone(&host);
    let forward = tokio::spawn(async move {
        while let Ok(beat) = beats.recv().await {
            if relay_host
                .send_beat(beat.bpm, beat.rr_interval_ms)
                .await
                .is_err()
            {
                break;
            }
        }
    });
    manager.activate(simulator).await.unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    let pattern = {
        let window = remote.lock().unwrap();
        assert!(window.len() >= 5, "{} beats relayed", window.len());
        assert!((window.average_bpm().unwrap() - 80.0).abs() <= 3.0);
        window.to_pulse_pattern(None).unwrap()
    };

    let actuator = Arc::new(RecordingActuator::new());
    let renderer =
        HapticRenderer::new(HapticsConfig::default()).with_vibration(actuator.clone());
    let playback = renderer.play_heartbeat(&pattern).await.unwrap();
    tokio::time::sleep(Duration::from_millis(playback.total_duration_ms + 10)).await;
    assert_eq!(actuator.vibrations().len(), pattern.haptic_sequence.len() * 2);

    // Guest leaves; the host keeps hosting.
    let guest_id = guest.local_participant_id().unwrap();
    let host_events = Arc::new(Mutex::new(Vec::new()));
    let host_sink = Arc::clone(&host_events);
    host.events().subscribe(Box::new(move |event: &SessionEvent| {
        host_sink.lock().unwrap().push(event.clone());
    }));
    guest.end_session().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(guest.state(), SessionState::Ended);
    assert_eq!(host.state(), SessionState::Hosting);
    assert_eq!(host.participants().len(), 1);
    let left: Vec<_> = host_events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, SessionEvent::ParticipantLeft(id) if *id == guest_id))
        .cloned()
        .collect();
    assert_eq!(left.len(), 1);

    manager.deactivate().await;
    host.end_session().await;
    assert_eq!(host.state(), SessionState::Ended);
    forward.abort();
}
