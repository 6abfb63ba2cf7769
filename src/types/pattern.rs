//! Pulse patterns and the haptic events they are rendered into.

use serde::{Deserialize, Serialize};

/// One element of a pulse pattern's haptic sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatternStep {
    /// A beat followed by `rr_interval_ms` until the next one.
    Interval { rr_interval_ms: u32 },
    /// An explicit pulse of the given strength and length.
    Pulse { intensity: f32, duration_ms: u32 },
}

impl PatternStep {
    pub fn duration_ms(&self) -> u32 {
        match self {
            PatternStep::Interval { rr_interval_ms } => *rr_interval_ms,
            PatternStep::Pulse { duration_ms, .. } => *duration_ms,
        }
    }
}

/// Phase lengths for a guided breath.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreathingGuide {
    pub inhale_ms: u32,
    pub hold_ms: u32,
    pub exhale_ms: u32,
}

impl BreathingGuide {
    pub fn total_ms(&self) -> u32 {
        self.inhale_ms + self.hold_ms + self.exhale_ms
    }
}

impl Default for BreathingGuide {
    fn default() -> Self {
        Self {
            inhale_ms: 4000,
            hold_ms: 2000,
            exhale_ms: 6000,
        }
    }
}

/// A heart rhythm ready for playback, either authored by the content
/// generator or synthesized from live beats.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PulsePattern {
    pub bpm: f32,
    pub rhythm_description: String,
    pub haptic_sequence: Vec<PatternStep>,
    pub emotional_state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breathing_guide: Option<BreathingGuide>,
    /// Overall strength in [0, 1].
    pub intensity: f32,
}

impl PulsePattern {
    pub fn new(
        bpm: f32,
        rhythm_description: impl Into<String>,
        haptic_sequence: Vec<PatternStep>,
        emotional_state: impl Into<String>,
        intensity: f32,
    ) -> Self {
        Self {
            bpm,
            rhythm_description: rhythm_description.into(),
            haptic_sequence,
            emotional_state: emotional_state.into(),
            breathing_guide: None,
            intensity: clamp_unit(intensity),
        }
    }

    pub fn with_breathing_guide(mut self, guide: BreathingGuide) -> Self {
        self.breathing_guide = Some(guide);
        self
    }

    /// Sum of all step durations.
    pub fn total_duration_ms(&self) -> u64 {
        self.haptic_sequence
            .iter()
            .map(|step| step.duration_ms() as u64)
            .sum()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HapticKind {
    Vibrate,
    Pause,
}

/// A single vibrate or pause instruction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HapticEvent {
    pub kind: HapticKind,
    pub duration_ms: u32,
    /// Strength in [0, 1]; always 0 for pauses.
    pub intensity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_hz: Option<f64>,
}

impl HapticEvent {
    pub fn vibrate(duration_ms: u32, intensity: f64, frequency_hz: Option<f64>) -> Self {
        Self {
            kind: HapticKind::Vibrate,
            duration_ms,
            intensity: clamp_unit_f64(intensity),
            frequency_hz,
        }
    }

    pub fn pause(duration_ms: u32) -> Self {
        Self {
            kind: HapticKind::Pause,
            duration_ms,
            intensity: 0.0,
            frequency_hz: None,
        }
    }

    pub fn is_vibrate(&self) -> bool {
        self.kind == HapticKind::Vibrate
    }
}

/// Total playback length of an event sequence.
pub fn total_duration_ms(events: &[HapticEvent]) -> u64 {
    events.iter().map(|e| e.duration_ms as u64).sum()
}

pub(crate) fn clamp_unit(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

pub(crate) fn clamp_unit_f64(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
