//! The haptic playback engine.
//!
//! Every playback mode compiles its input to a list of [`HapticEvent`]s and
//! runs it on one spawned task. Starting any playback first cancels the
//! one in flight, so at most one pattern ever drives the actuators.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::actuation::{actuation_for_events, dual_motor_effects, waveform_events, ActuationStep};
use super::actuator::{DualMotorActuator, VibrationActuator};
use super::texture::texture_to_haptic_pattern;
use super::{heartbeat_events, HapticError};
use crate::flow::{lock, DataChannel};
use crate::types::pattern::total_duration_ms;
use crate::types::{HapticEvent, PhysicalProperties, PulsePattern};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HapticsConfig {
    /// Drive an attached dual-motor actuator alongside the plain motor.
    pub dual_motor: bool,
    /// Upper bound on `play_texture` loop counts.
    pub max_texture_loops: u32,
}

impl Default for HapticsConfig {
    fn default() -> Self {
        Self {
            dual_motor: true,
            max_texture_loops: 50,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMode {
    Pattern,
    Waveform,
    Texture,
    Heartbeat,
}

/// Handle describing a started playback.
#[derive(Clone, Debug, PartialEq)]
pub struct Playback {
    pub id: Uuid,
    pub mode: PlaybackMode,
    /// Sum of all event durations across every loop.
    pub total_duration_ms: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PlaybackEvent {
    Started(Playback),
    Finished(Uuid),
    Cancelled(Uuid),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RendererState {
    Idle,
    Playing,
    Stopped,
}

struct ActivePlayback {
    playback: Playback,
    task: JoinHandle<()>,
}

pub struct HapticRenderer {
    config: HapticsConfig,
    vibration: Option<Arc<dyn VibrationActuator>>,
    dual_motor: Option<Arc<dyn DualMotorActuator>>,
    events: Arc<DataChannel<PlaybackEvent>>,
    active: Arc<Mutex<Option<ActivePlayback>>>,
    state: Arc<Mutex<RendererState>>,
    /// Serializes `start` so a cancel that yields cannot let two chains in.
    starting: tokio::sync::Mutex<()>,
}

impl HapticRenderer {
    pub fn new(config: HapticsConfig) -> Self {
        Self {
            config,
            vibration: None,
            dual_motor: None,
            events: Arc::new(DataChannel::new("haptic-playback")),
            active: Arc::new(Mutex::new(None)),
            state: Arc::new(Mutex::new(RendererState::Idle)),
            starting: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_vibration(mut self, actuator: Arc<dyn VibrationActuator>) -> Self {
        self.vibration = Some(actuator);
        self
    }

    pub fn with_dual_motor(mut self, actuator: Arc<dyn DualMotorActuator>) -> Self {
        self.dual_motor = Some(actuator);
        self
    }

    pub fn events(&self) -> &Arc<DataChannel<PlaybackEvent>> {
        &self.events
    }

    pub fn state(&self) -> RendererState {
        *lock(&self.state)
    }

    /// The playback in flight, if any.
    pub fn current(&self) -> Option<Playback> {
        lock(&self.active).as_ref().map(|a| a.playback.clone())
    }

    fn dual_motor(&self) -> Option<Arc<dyn DualMotorActuator>> {
        if self.config.dual_motor {
            self.dual_motor.clone()
        } else {
            None
        }
    }

    pub fn has_actuator(&self) -> bool {
        self.vibration.is_some() || self.dual_motor().is_some()
    }

    /// Play an explicit event sequence once.
    pub async fn play_pattern(&self, events: Vec<HapticEvent>) -> Result<Playback, HapticError> {
        self.start(PlaybackMode::Pattern, events, 1).await
    }

    /// Play a normalized waveform stretched over `total_duration_ms`.
    pub async fn play_waveform(
        &self,
        samples: &[f64],
        total_duration_ms: u32,
    ) -> Result<Playback, HapticError> {
        let events = waveform_events(samples, total_duration_ms);
        self.start(PlaybackMode::Waveform, events, 1).await
    }

    /// Play a material texture `loop_count` times back to back.
    pub async fn play_texture(
        &self,
        props: &PhysicalProperties,
        loop_count: u32,
    ) -> Result<Playback, HapticError> {
        let events = texture_to_haptic_pattern(props);
        let loops = loop_count.clamp(1, self.config.max_texture_loops.max(1));
        self.start(PlaybackMode::Texture, events, loops).await
    }

    /// Play a pulse pattern as lub-dub beats.
    pub async fn play_heartbeat(&self, pattern: &PulsePattern) -> Result<Playback, HapticError> {
        self.start(PlaybackMode::Heartbeat, heartbeat_events(pattern), 1)
            .await
    }

    /// Cancel the playback in flight. Does nothing when idle.
    pub async fn stop(&self) {
        let previous = lock(&self.active).take();
        let Some(previous) = previous else {
            return;
        };
        previous.task.abort();
        *lock(&self.state) = RendererState::Stopped;

        if let Some(vibration) = &self.vibration {
            if let Err(e) = vibration.cancel().await {
                log::debug!("Vibration cancel failed: {}", e);
            }
        }
        if let Some(dual) = self.dual_motor() {
            if let Err(e) = dual.cancel().await {
                log::debug!("Dual-motor cancel failed: {}", e);
            }
        }
        log::debug!("Cancelled playback {}", previous.playback.id);
        self.events
            .publish(PlaybackEvent::Cancelled(previous.playback.id));
    }

    async fn start(
        &self,
        mode: PlaybackMode,
        events: Vec<HapticEvent>,
        loops: u32,
    ) -> Result<Playback, HapticError> {
        if !self.has_actuator() {
            return Err(HapticError::NoActuator);
        }
        let _starting = self.starting.lock().await;
        self.stop().await;

        let pass_ms = total_duration_ms(&events);
        let playback = Playback {
            id: Uuid::new_v4(),
            mode,
            total_duration_ms: pass_ms * loops as u64,
        };
        let steps = actuation_for_events(&events);
        let dual = self.dual_motor();
        let effects = if dual.is_some() {
            dual_motor_effects(&events)
        } else {
            Vec::new()
        };

        log::debug!(
            "Starting {:?} playback {} ({} ms x {})",
            mode,
            playback.id,
            pass_ms,
            loops
        );
        self.events.publish(PlaybackEvent::Started(playback.clone()));

        let id = playback.id;
        let vibration = self.vibration.clone();
        let active = Arc::clone(&self.active);
        let state = Arc::clone(&self.state);
        let channel = Arc::clone(&self.events);

        // Hold the slot while spawning so the task cannot finish before it
        // is registered.
        let mut slot = lock(&self.active);
        let task = tokio::spawn(async move {
            for _ in 0..loops {
                if let Some(dual) = &dual {
                    if let Err(e) = dual.play_effects(&effects).await {
                        log::debug!("Dual-motor effects rejected: {}", e);
                    }
                }
                for step in &steps {
                    match *step {
                        ActuationStep::On(ms) => {
                            if let Some(vibration) = &vibration {
                                if let Err(e) = vibration.vibrate(ms).await {
                                    log::warn!("Vibration failed: {}", e);
                                }
                            }
                            tokio::time::sleep(Duration::from_millis(ms as u64)).await;
                        }
                        ActuationStep::Off(ms) => {
                            tokio::time::sleep(Duration::from_millis(ms as u64)).await;
                        }
                    }
                }
            }

            let finished = {
                let mut slot = lock(&active);
                if slot.as_ref().map(|a| a.playback.id) == Some(id) {
                    *slot = None;
                    *lock(&state) = RendererState::Idle;
                    true
                } else {
                    false
                }
            };
            if finished {
                channel.publish(PlaybackEvent::Finished(id));
            }
        });
        let displaced = slot.replace(ActivePlayback {
            playback: playback.clone(),
            task,
        });
        *lock(&self.state) = RendererState::Playing;
        drop(slot);

        if let Some(displaced) = displaced {
            displaced.task.abort();
            self.events
                .publish(PlaybackEvent::Cancelled(displaced.playback.id));
        }

        Ok(playback)
    }
}
