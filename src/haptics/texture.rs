//! Material texture to pulse train.
//!
//! The mapping constants are a fixed contract shared with other renderers
//! of the same texture vectors; changing any of them changes what a given
//! material feels like.

use crate::types::{HapticEvent, PhysicalProperties};

/// Linear congruential generator (Numerical Recipes constants, modulus 2^32).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lcg {
    state: u32,
}

impl Lcg {
    const MULTIPLIER: u32 = 1_664_525;
    const INCREMENT: u32 = 1_013_904_223;

    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    pub fn next_u32(&mut self) -> u32 {
        self.state = self
            .state
            .wrapping_mul(Self::MULTIPLIER)
            .wrapping_add(Self::INCREMENT);
        self.state
    }

    /// Uniform in [0, 1).
    pub fn next_f64(&mut self) -> f64 {
        self.next_u32() as f64 / 4_294_967_296.0
    }

    /// Uniform in [-0.5, 0.5).
    fn next_centered(&mut self) -> f64 {
        self.next_f64() - 0.5
    }
}

fn milli(value: f64) -> u32 {
    (value * 1000.0).round() as u32
}

/// Seed derived from the properties that shape the jitter.
pub fn texture_seed(props: &PhysicalProperties) -> u32 {
    let p = props.clamped();
    milli(p.friction)
        .wrapping_mul(31)
        .wrapping_add(milli(p.grain).wrapping_mul(17))
        .wrapping_add(milli(p.roughness))
}

/// Derive the pulse train for one pass over a texture.
///
/// Deterministic: the same properties always give the same events.
pub fn texture_to_haptic_pattern(props: &PhysicalProperties) -> Vec<HapticEvent> {
    let p = props.clamped();
    let pulse_count = 4 + (p.friction * 8.0).round() as usize;

    let temperature = p.normalized_temperature();
    let base_frequency = 350.0 - temperature * 300.0;
    let base_duration = 20.0 + temperature * 280.0;
    let base_intensity = 0.15 + p.roughness * 0.75;
    let base_pause = 150.0 - p.friction * 120.0;
    let bounce = p.elasticity > 0.5;

    let mut rng = Lcg::new(texture_seed(&p));
    let mut events = Vec::with_capacity(pulse_count * if bounce { 4 } else { 2 });

    for index in 0..pulse_count {
        let duration = (base_duration * (1.0 + p.grain * rng.next_centered() * 0.6)).max(10.0);
        let intensity =
            (base_intensity * (1.0 + p.grain * rng.next_centered() * 0.5)).clamp(0.05, 1.0);
        let frequency = base_frequency * (1.0 + p.grain * rng.next_centered() * 0.4);
        let duration_ms = duration.round() as u32;
        events.push(HapticEvent::vibrate(duration_ms, intensity, Some(frequency)));

        if index + 1 == pulse_count {
            break;
        }

        let pause = (base_pause * (1.0 + p.grain * rng.next_f64() * 0.5) * (1.0 - p.moisture * 0.5))
            .max(5.0);
        if bounce {
            events.push(HapticEvent::pause((pause * 0.3).round() as u32));
            events.push(HapticEvent::vibrate(
                (duration_ms as f64 * 0.3).round().max(1.0) as u32,
                intensity * 0.5 * p.elasticity,
                Some(frequency * 1.2),
            ));
            events.push(HapticEvent::pause((pause * 0.7).round() as u32));
        } else {
            events.push(HapticEvent::pause(pause.round() as u32));
        }
    }
    events
}
