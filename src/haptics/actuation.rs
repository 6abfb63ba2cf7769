//! Compiling haptic events down to what actuators can actually do.
//!
//! Plain vibration motors only switch on and off, so intensity is
//! approximated by duty cycle: a `Vibrate` of `d` ms at intensity `i` runs
//! the motor for `round(d * i)` ms and idles for the rest. Dual-motor
//! actuators instead get explicit strong/weak magnitudes per event.

use serde::{Deserialize, Serialize};

use crate::types::pattern::clamp_unit_f64;
use crate::types::{HapticEvent, HapticKind};

/// One on/off instruction for a binary vibration motor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActuationStep {
    On(u32),
    Off(u32),
}

impl ActuationStep {
    pub fn duration_ms(&self) -> u32 {
        match *self {
            ActuationStep::On(ms) | ActuationStep::Off(ms) => ms,
        }
    }
}

/// Frequency assumed for vibrate events that carry none.
const DEFAULT_FREQUENCY_HZ: f64 = 200.0;
const LOW_FREQUENCY_HZ: f64 = 50.0;
const FREQUENCY_SPAN_HZ: f64 = 300.0;

/// A single effect for a two-motor (strong/weak rumble) actuator.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DualMotorEffect {
    /// Offset from the start of the pattern.
    pub start_delay_ms: u64,
    pub duration_ms: u32,
    pub strong_magnitude: f64,
    pub weak_magnitude: f64,
}

fn push_merged(steps: &mut Vec<ActuationStep>, step: ActuationStep) {
    if step.duration_ms() == 0 {
        return;
    }
    if let Some(last) = steps.last_mut() {
        match (last, step) {
            (ActuationStep::On(prev), ActuationStep::On(ms))
            | (ActuationStep::Off(prev), ActuationStep::Off(ms)) => {
                *prev += ms;
                return;
            }
            _ => {}
        }
    }
    steps.push(step);
}

/// On/off steps for an event sequence. The total duration is preserved.
pub fn actuation_for_events(events: &[HapticEvent]) -> Vec<ActuationStep> {
    let mut steps = Vec::with_capacity(events.len() * 2);
    for event in events {
        match event.kind {
            HapticKind::Vibrate => {
                let on = ((event.duration_ms as f64 * clamp_unit_f64(event.intensity)).round()
                    as u32)
                    .min(event.duration_ms);
                push_merged(&mut steps, ActuationStep::On(on));
                push_merged(&mut steps, ActuationStep::Off(event.duration_ms - on));
            }
            HapticKind::Pause => push_merged(&mut steps, ActuationStep::Off(event.duration_ms)),
        }
    }
    steps
}

/// Spread `total_ms` evenly over the samples, one vibrate event per slice
/// with the sample's amplitude as intensity.
///
/// Slice boundaries are rounded down so the slices always add up to
/// exactly `total_ms`.
pub fn waveform_events(samples: &[f64], total_ms: u32) -> Vec<HapticEvent> {
    if samples.is_empty() {
        return Vec::new();
    }
    let n = samples.len() as u64;
    let total = total_ms as u64;
    samples
        .iter()
        .enumerate()
        .map(|(k, &amplitude)| {
            let k = k as u64;
            let start = total * k / n;
            let end = total * (k + 1) / n;
            HapticEvent::vibrate((end - start) as u32, clamp_unit_f64(amplitude), None)
        })
        .collect()
}

pub fn actuation_for_waveform(samples: &[f64], total_ms: u32) -> Vec<ActuationStep> {
    actuation_for_events(&waveform_events(samples, total_ms))
}

/// Strong/weak effects with cumulative start delays.
///
/// Low frequencies favour the strong motor, high frequencies the weak one.
pub fn dual_motor_effects(events: &[HapticEvent]) -> Vec<DualMotorEffect> {
    let mut effects = Vec::new();
    let mut offset: u64 = 0;
    for event in events {
        if event.is_vibrate() && event.duration_ms > 0 {
            let frequency = event.frequency_hz.unwrap_or(DEFAULT_FREQUENCY_HZ);
            let high = clamp_unit_f64((frequency - LOW_FREQUENCY_HZ) / FREQUENCY_SPAN_HZ);
            let intensity = clamp_unit_f64(event.intensity);
            effects.push(DualMotorEffect {
                start_delay_ms: offset,
                duration_ms: event.duration_ms,
                strong_magnitude: intensity * (1.0 - high),
                weak_magnitude: intensity * high,
            });
        }
        offset += event.duration_ms as u64;
    }
    effects
}

pub fn total_duration_ms(steps: &[ActuationStep]) -> u64 {
    steps.iter().map(|s| s.duration_ms() as u64).sum()
}
