//! Haptic rendering
//!
//! Turns explicit event lists, normalized waveforms, material textures and
//! heart rhythms into vibrate/pause sequences and drives them to the
//! available actuators. See [`renderer::HapticRenderer`].

pub mod actuation;
pub mod actuator;
pub mod renderer;
pub mod texture;

pub use actuation::{ActuationStep, DualMotorEffect};
pub use actuator::{DualMotorActuator, RecordingActuator, VibrationActuator};
pub use renderer::{HapticRenderer, HapticsConfig, Playback, PlaybackEvent, PlaybackMode, RendererState};
pub use texture::{texture_seed, texture_to_haptic_pattern, Lcg};

use thiserror::Error;

use crate::types::{HapticEvent, PatternStep, PulsePattern};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HapticError {
    #[error("No vibration actuator available")]
    NoActuator,

    #[error("Actuator error: {0}")]
    Actuator(String),
}

const LUB_MS: u32 = 70;
const LUB_DUB_GAP_MS: u32 = 90;
const DUB_MS: u32 = 50;
const MIN_BEAT_INTENSITY: f64 = 0.3;
const DUB_SHARE: f64 = 0.6;

/// Render a pulse pattern as a "lub-dub" sequence.
///
/// Each interval step becomes a strong pulse, a short gap, a softer pulse
/// and a rest filling the remainder of the interval, so the sequence lasts
/// exactly as long as the pattern. Intervals too short for the full
/// double pulse are compressed proportionally.
pub fn heartbeat_events(pattern: &PulsePattern) -> Vec<HapticEvent> {
    let lub_intensity = (pattern.intensity as f64).max(MIN_BEAT_INTENSITY);
    let dub_intensity = lub_intensity * DUB_SHARE;
    let mut events = Vec::with_capacity(pattern.haptic_sequence.len() * 4);

    for step in &pattern.haptic_sequence {
        match *step {
            PatternStep::Interval { rr_interval_ms } => {
                let full = LUB_MS + LUB_DUB_GAP_MS + DUB_MS;
                let (lub, gap, dub) = if rr_interval_ms >= full {
                    (LUB_MS, LUB_DUB_GAP_MS, DUB_MS)
                } else {
                    (
                        rr_interval_ms * LUB_MS / full,
                        rr_interval_ms * LUB_DUB_GAP_MS / full,
                        rr_interval_ms * DUB_MS / full,
                    )
                };
                let rest = rr_interval_ms - lub - gap - dub;
                events.push(HapticEvent::vibrate(lub, lub_intensity, None));
                events.push(HapticEvent::pause(gap));
                events.push(HapticEvent::vibrate(dub, dub_intensity, None));
                if rest > 0 {
                    events.push(HapticEvent::pause(rest));
                }
            }
            PatternStep::Pulse {
                intensity,
                duration_ms,
            } => events.push(HapticEvent::vibrate(duration_ms, intensity as f64, None)),
        }
    }
    events
}
