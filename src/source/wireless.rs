//! Wireless heart rate sensor source
//!
//! Subscribes to a [`HeartRateSensor`] and turns every Heart Rate
//! Measurement frame into a beat. Malformed frames are dropped without
//! tearing down the link. When the link closes on its own the source
//! clears its state and reports [`DisconnectReason::LinkLost`].

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use super::{BeatEmitter, BeatSource, SourceError, SourceKind, SourceState};
use crate::ble::gatt::{parse_heart_rate_measurement, HeartRateMeasurement};
use crate::ble::transport::HeartRateSensor;
use crate::flow::{lock, DataChannel};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// `stop()` was called.
    Requested,
    /// The sensor went away.
    LinkLost,
}

pub struct WirelessSensor {
    sensor: Arc<dyn HeartRateSensor>,
    emitter: BeatEmitter,
    disconnects: Arc<DataChannel<DisconnectReason>>,
    last_measurement: Arc<Mutex<Option<HeartRateMeasurement>>>,
    state: Arc<Mutex<SourceState>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl WirelessSensor {
    pub fn new(sensor: Arc<dyn HeartRateSensor>, emitter: BeatEmitter) -> Self {
        Self {
            sensor,
            emitter,
            disconnects: Arc::new(DataChannel::new("sensor-disconnects")),
            last_measurement: Arc::new(Mutex::new(None)),
            state: Arc::new(Mutex::new(SourceState::Idle)),
            pump: Mutex::new(None),
        }
    }

    /// Fires once per disconnection, separately from the beat stream.
    pub fn disconnects(&self) -> &Arc<DataChannel<DisconnectReason>> {
        &self.disconnects
    }

    pub fn last_measurement(&self) -> Option<HeartRateMeasurement> {
        lock(&self.last_measurement).clone()
    }

    pub fn sensor_name(&self) -> &str {
        self.sensor.name()
    }
}

#[async_trait]
impl BeatSource for WirelessSensor {
    fn kind(&self) -> SourceKind {
        SourceKind::Wireless
    }

    async fn start(&self) -> Result<(), SourceError> {
        if let Some(previous) = lock(&self.pump).take() {
            previous.abort();
        }

        let mut frames = self.sensor.subscribe().await.map_err(|e| {
            log::warn!("Heart rate sensor {} failed to connect: {}", self.sensor.name(), e);
            SourceError::Hardware(e)
        })?;
        log::info!("Subscribed to heart rate sensor {}", self.sensor.name());

        let emitter = self.emitter.clone();
        let disconnects = Arc::clone(&self.disconnects);
        let last_measurement = Arc::clone(&self.last_measurement);
        let state = Arc::clone(&self.state);
        let name = self.sensor.name().to_string();

        *lock(&self.state) = SourceState::Running;
        let handle = tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                match parse_heart_rate_measurement(&frame) {
                    Ok(measurement) => {
                        let (bpm, rr) = measurement.beat();
                        *lock(&last_measurement) = Some(measurement);
                        emitter.emit(bpm, rr);
                    }
                    Err(e) => {
                        log::warn!("Dropping malformed frame from {}: {}", name, e);
                    }
                }
            }

            log::info!("Heart rate sensor {} disconnected", name);
            *lock(&last_measurement) = None;
            *lock(&state) = SourceState::Stopped;
            disconnects.publish(DisconnectReason::LinkLost);
        });
        *lock(&self.pump) = Some(handle);
        Ok(())
    }

    async fn stop(&self) {
        let pump = lock(&self.pump).take();
        if let Some(handle) = pump {
            handle.abort();
        }
        if let Err(e) = self.sensor.disconnect().await {
            log::debug!("Sensor disconnect reported: {}", e);
        }
        *lock(&self.last_measurement) = None;

        let was_running = {
            let mut state = lock(&self.state);
            let was_running = *state == SourceState::Running;
            if was_running {
                *state = SourceState::Stopped;
            }
            was_running
        };
        if was_running {
            self.disconnects.publish(DisconnectReason::Requested);
        }
    }

    fn state(&self) -> SourceState {
        *lock(&self.state)
    }
}
